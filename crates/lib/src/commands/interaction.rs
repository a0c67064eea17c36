//! Inbound interactions: command invocations and component clicks.

use crate::codec::{self, DecodeError};
use crate::snowflake::Snowflake;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionType {
    Ping,
    ApplicationCommand,
    MessageComponent,
    Autocomplete,
    ModalSubmit,
    Unknown(u64),
}

impl InteractionType {
    pub fn from_u64(value: u64) -> Self {
        match value {
            1 => InteractionType::Ping,
            2 => InteractionType::ApplicationCommand,
            3 => InteractionType::MessageComponent,
            4 => InteractionType::Autocomplete,
            5 => InteractionType::ModalSubmit,
            other => InteractionType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

/// Who triggered the interaction: a guild member inside a server, a bare user in DMs.
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    User(User),
    Member(Member),
}

impl Actor {
    pub fn user(&self) -> Option<&User> {
        match self {
            Actor::User(user) => Some(user),
            Actor::Member(member) => member.user.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u64,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandData {
    pub id: Snowflake,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u64,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub target_id: Option<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentData {
    pub custom_id: String,
    #[serde(default)]
    pub component_type: u64,
}

impl ComponentData {
    /// The bytes the application packed into the custom id when it sent the component.
    pub fn payload(&self) -> Result<Vec<u8>, DecodeError> {
        codec::decode(&self.custom_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionData {
    Command(CommandData),
    Component(ComponentData),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: Snowflake,
    pub application_id: Snowflake,
    pub kind: InteractionType,
    pub data: InteractionData,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub actor: Option<Actor>,
    /// One-time token for the response callback.
    pub token: String,
}

fn field<T: DeserializeOwned>(data: &Value, key: &str) -> Option<T> {
    data.get(key).and_then(|v| T::deserialize(v).ok())
}

impl Interaction {
    /// Parse an `INTERACTION_CREATE` payload. `id`, `application_id`, `type` and `token` are
    /// required, as is `data` for command and component interactions.
    pub fn parse(data: &Value) -> Option<Interaction> {
        let Some(id) = field::<Snowflake>(data, "id") else {
            log::error!("interaction without a valid id");
            return None;
        };
        let Some(application_id) = field::<Snowflake>(data, "application_id") else {
            log::error!("interaction {} has no valid application id", id);
            return None;
        };
        let Some(kind) = data.get("type").and_then(Value::as_u64) else {
            log::error!("interaction {} has no type", id);
            return None;
        };
        let kind = InteractionType::from_u64(kind);

        let payload = match kind {
            InteractionType::ApplicationCommand | InteractionType::Autocomplete => {
                field::<CommandData>(data, "data").map(InteractionData::Command)
            }
            InteractionType::MessageComponent => {
                field::<ComponentData>(data, "data").map(InteractionData::Component)
            }
            _ => Some(InteractionData::None),
        };
        let Some(payload) = payload else {
            log::error!("interaction {} ({:?}) is missing valid data", id, kind);
            return None;
        };

        let Some(token) = data.get("token").and_then(Value::as_str) else {
            log::error!("interaction {} has no response token", id);
            return None;
        };

        let actor = match field::<Member>(data, "member") {
            Some(member) => Some(Actor::Member(member)),
            None => field::<User>(data, "user").map(Actor::User),
        };

        Some(Interaction {
            id,
            application_id,
            kind,
            data: payload,
            guild_id: field(data, "guild_id"),
            channel_id: field(data, "channel_id"),
            actor,
            token: token.to_string(),
        })
    }

    pub fn user(&self) -> Option<&User> {
        self.actor.as_ref().and_then(Actor::user)
    }
}
