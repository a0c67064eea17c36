//! Command specs, registered commands and option decoding.

use crate::commands::interaction::{CommandOption, Interaction, InteractionData};
use crate::snowflake::Snowflake;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandType {
    #[default]
    ChatInput = 1,
    User = 2,
    Message = 3,
    PrimaryEntryPoint = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    String = 3,
    Integer = 4,
    Boolean = 5,
    User = 6,
    Channel = 7,
    Role = 8,
    Mentionable = 9,
    Number = 10,
    Attachment = 11,
}

impl Serialize for CommandType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl Serialize for OptionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionChoice {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOptionSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: OptionType,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<OptionChoice>,
}

impl CommandOptionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: OptionType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
            choices: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn choice(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.choices.push(OptionChoice {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// What a command callback receives besides the caller's context.
pub struct Invocation<'a> {
    pub command: &'a str,
    pub options: &'a HashMap<String, String>,
    pub interaction: &'a Interaction,
}

pub type CommandCallback<C> = Box<dyn FnMut(&mut C, &Invocation<'_>)>;

pub struct CommandSpec<C> {
    pub name: String,
    pub description: String,
    pub kind: CommandType,
    pub options: Vec<CommandOptionSpec>,
    /// Falls back to the registry's default guild; `None` there too means global.
    pub guild_id: Option<Snowflake>,
    pub callback: CommandCallback<C>,
}

impl<C> CommandSpec<C> {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        callback: impl FnMut(&mut C, &Invocation<'_>) + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: CommandType::ChatInput,
            options: Vec::new(),
            guild_id: None,
            callback: Box::new(callback),
        }
    }

    pub fn kind(mut self, kind: CommandType) -> Self {
        self.kind = kind;
        self
    }

    pub fn option(mut self, option: CommandOptionSpec) -> Self {
        self.options.push(option);
        self
    }

    pub fn guild(mut self, guild_id: Snowflake) -> Self {
        self.guild_id = Some(guild_id);
        self
    }

    /// Body of the remote create-command call.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(CreateCommand {
            name: &self.name,
            description: &self.description,
            kind: self.kind,
            options: &self.options,
        })
    }
}

#[derive(Serialize)]
struct CreateCommand<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    kind: CommandType,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    options: &'a [CommandOptionSpec],
}

/// A command known both locally and to the remote side.
pub struct Command<C> {
    name: String,
    app_id: Snowflake,
    guild_id: Option<Snowflake>,
    kind: CommandType,
    callback: CommandCallback<C>,
}

impl<C> Command<C> {
    pub fn new(spec: CommandSpec<C>, app_id: Snowflake, guild_id: Option<Snowflake>) -> Self {
        Self {
            name: spec.name,
            app_id,
            guild_id,
            kind: spec.kind,
            callback: spec.callback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app_id(&self) -> Snowflake {
        self.app_id
    }

    pub fn guild_id(&self) -> Option<Snowflake> {
        self.guild_id
    }

    pub fn kind(&self) -> CommandType {
        self.kind
    }

    /// Run the callback if `interaction` is an invocation of this command for this application.
    /// Anything else is logged and ignored.
    pub fn invoke(&mut self, ctx: &mut C, interaction: &Interaction) -> bool {
        if interaction.application_id != self.app_id {
            log::warn!(
                "interaction for app {} does not match command {} (app {}); ignoring",
                interaction.application_id,
                self.name,
                self.app_id
            );
            return false;
        }

        let InteractionData::Command(data) = &interaction.data else {
            log::warn!("interaction {} is not a command invocation; disregarding", interaction.id);
            return false;
        };
        if data.name != self.name {
            log::warn!("command names don't match ({} vs {}); disregarding", data.name, self.name);
            return false;
        }

        let options = decode_options(&data.options);
        log::debug!("invoking command {} ({} option(s))", self.name, options.len());
        (self.callback)(
            ctx,
            &Invocation {
                command: &self.name,
                options: &options,
                interaction,
            },
        );
        true
    }
}

fn option_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Map option names to values. Repeated names are joined with `;` in the order received.
///
/// Non-string values are rendered as JSON text (`42`, `true`) before joining, so the joined form
/// cannot tell `"1;2"` the string from two integers.
pub fn decode_options(options: &[CommandOption]) -> HashMap<String, String> {
    let mut decoded: HashMap<String, String> = HashMap::with_capacity(options.len());
    for option in options {
        let value = option_value_string(&option.value);
        match decoded.get_mut(&option.name) {
            Some(existing) => {
                log::trace!("option {} repeated; joining values", option.name);
                existing.push(';');
                existing.push_str(&value);
            }
            None => {
                decoded.insert(option.name.clone(), value);
            }
        }
    }
    decoded
}
