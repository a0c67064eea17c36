//! Application commands: interaction parsing, components, and the command registry.

mod command;
mod component;
mod interaction;
mod registry;

pub use command::{
    decode_options, Command, CommandCallback, CommandOptionSpec, CommandSpec, CommandType,
    Invocation, OptionChoice, OptionType,
};
pub use component::{
    Button, ButtonStyle, Component, InteractionResponse, MessageResponse, MESSAGE_EPHEMERAL,
    MESSAGE_IS_COMPONENTS_V2,
};
pub use interaction::{
    Actor, CommandData, CommandOption, ComponentData, Interaction, InteractionData,
    InteractionType, Member, User,
};
pub use registry::{CommandError, CommandRegistry, CommandRemote, ComponentHandler};
