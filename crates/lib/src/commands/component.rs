//! Message components and interaction responses.

use crate::codec::{self, MAX_CUSTOM_ID_LEN};
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};

const ACTION_ROW: u8 = 1;
const BUTTON: u8 = 2;
const TEXT_DISPLAY: u8 = 10;

pub const MESSAGE_EPHEMERAL: u32 = 1 << 6;
/// Required when a message carries layout components such as text displays.
pub const MESSAGE_IS_COMPONENTS_V2: u32 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary = 1,
    Secondary = 2,
    Success = 3,
    Danger = 4,
}

impl Serialize for ButtonStyle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// A button whose custom id carries `data`, handed back verbatim when it is clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub style: ButtonStyle,
    pub label: String,
    pub data: Vec<u8>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    ActionRow(Vec<Component>),
    Button(Button),
    TextDisplay(String),
}

impl Component {
    pub fn action_row(children: Vec<Component>) -> Self {
        Component::ActionRow(children)
    }

    pub fn button(style: ButtonStyle, label: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Component::Button(Button {
            style,
            label: label.into(),
            data: data.into(),
            disabled: false,
        })
    }

    pub fn text(content: impl Into<String>) -> Self {
        Component::TextDisplay(content.into())
    }
}

impl Serialize for Component {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Component::ActionRow(children) => {
                map.serialize_entry("type", &ACTION_ROW)?;
                map.serialize_entry("components", children)?;
            }
            Component::Button(button) => {
                let custom_id = codec::encode(&button.data);
                if custom_id.len() > MAX_CUSTOM_ID_LEN {
                    return Err(S::Error::custom(format!(
                        "button {:?} data encodes to {} characters (max {})",
                        button.label,
                        custom_id.len(),
                        MAX_CUSTOM_ID_LEN
                    )));
                }
                map.serialize_entry("type", &BUTTON)?;
                map.serialize_entry("style", &button.style)?;
                map.serialize_entry("label", &button.label)?;
                map.serialize_entry("disabled", &button.disabled)?;
                map.serialize_entry("custom_id", &custom_id)?;
            }
            Component::TextDisplay(content) => {
                map.serialize_entry("type", &TEXT_DISPLAY)?;
                map.serialize_entry("content", content)?;
            }
        }
        map.end()
    }
}

fn is_zero(flags: &u32) -> bool {
    *flags == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageResponse {
    #[serde(skip_serializing_if = "is_zero")]
    pub flags: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
}

impl MessageResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Components-only message. Sets the components-v2 flag.
    pub fn components(components: Vec<Component>) -> Self {
        Self {
            flags: MESSAGE_IS_COMPONENTS_V2,
            content: None,
            components,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.flags |= MESSAGE_EPHEMERAL;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageResponse>,
}

impl InteractionResponse {
    pub const PONG: u8 = 1;
    pub const CHANNEL_MESSAGE: u8 = 4;
    pub const DEFERRED_UPDATE_MESSAGE: u8 = 6;

    pub fn pong() -> Self {
        Self {
            kind: Self::PONG,
            data: None,
        }
    }

    /// Reply with a new message.
    pub fn message(message: MessageResponse) -> Self {
        Self {
            kind: Self::CHANNEL_MESSAGE,
            data: Some(message),
        }
    }

    /// Acknowledge a component click without changing anything yet.
    pub fn deferred_update() -> Self {
        Self {
            kind: Self::DEFERRED_UPDATE_MESSAGE,
            data: None,
        }
    }
}
