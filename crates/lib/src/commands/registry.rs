//! Named command table with remote-first registration and interaction dispatch.

use crate::commands::command::{Command, CommandSpec};
use crate::commands::interaction::{Interaction, InteractionData, InteractionType};
use crate::rest::{RestError, RestResponse};
use crate::snowflake::Snowflake;
use serde_json::Value;
use std::collections::HashMap;

/// The remote half of command registration.
pub trait CommandRemote {
    fn create_command(
        &mut self,
        app_id: Snowflake,
        guild_id: Option<Snowflake>,
        body: &Value,
    ) -> Result<RestResponse, RestError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command {0:?} is already registered")]
    Duplicate(String),
    #[error("registering command {name:?}: {source}")]
    Remote {
        name: String,
        #[source]
        source: RestError,
    },
    #[error("registering command {name:?} was rejected with status {status}")]
    Rejected {
        name: String,
        status: u16,
        body: Option<Value>,
    },
    #[error("encoding command {name:?}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Receives component clicks with the bytes decoded from the custom id.
pub type ComponentHandler<C> = Box<dyn FnMut(&mut C, &Interaction, &[u8])>;

/// Commands by name, plus the component click handler. Names are unique.
pub struct CommandRegistry<C> {
    app_id: Snowflake,
    default_guild: Option<Snowflake>,
    commands: HashMap<String, Command<C>>,
    component_handler: Option<ComponentHandler<C>>,
}

impl<C> CommandRegistry<C> {
    pub fn new(app_id: Snowflake, default_guild: Option<Snowflake>) -> Self {
        Self {
            app_id,
            default_guild,
            commands: HashMap::new(),
            component_handler: None,
        }
    }

    pub fn app_id(&self) -> Snowflake {
        self.app_id
    }

    /// Register remotely, then locally. The local entry exists only if the remote call
    /// succeeded with a 2xx status.
    pub fn register(
        &mut self,
        remote: &mut dyn CommandRemote,
        spec: CommandSpec<C>,
    ) -> Result<&Command<C>, CommandError> {
        if self.commands.contains_key(&spec.name) {
            log::warn!("command {} already registered; ignoring", spec.name);
            return Err(CommandError::Duplicate(spec.name));
        }

        let guild_id = spec.guild_id.or(self.default_guild);
        let body = spec.payload().map_err(|source| CommandError::Encode {
            name: spec.name.clone(),
            source,
        })?;
        let response = remote
            .create_command(self.app_id, guild_id, &body)
            .map_err(|source| {
                log::error!("failed to register command {}: {}", spec.name, source);
                CommandError::Remote {
                    name: spec.name.clone(),
                    source,
                }
            })?;
        if !response.is_success() {
            log::error!(
                "command {} rejected with status {}",
                spec.name,
                response.status
            );
            return Err(CommandError::Rejected {
                name: spec.name,
                status: response.status,
                body: response.body,
            });
        }

        match guild_id {
            Some(guild) => log::info!("registered command {} in guild {}", spec.name, guild),
            None => log::info!("registered global command {}", spec.name),
        }
        let command = Command::new(spec, self.app_id, guild_id);
        Ok(self
            .commands
            .entry(command.name().to_string())
            .or_insert(command))
    }

    /// Route an interaction. Returns whether a callback ran.
    pub fn dispatch(&mut self, ctx: &mut C, interaction: &Interaction) -> bool {
        if interaction.kind == InteractionType::Autocomplete {
            log::trace!("autocomplete interaction {} not dispatched", interaction.id);
            return false;
        }
        match &interaction.data {
            InteractionData::Command(data) => match self.commands.get_mut(&data.name) {
                Some(command) => command.invoke(ctx, interaction),
                None => {
                    log::warn!("command {} not found", data.name);
                    false
                }
            },
            InteractionData::Component(data) => {
                if interaction.application_id != self.app_id {
                    log::warn!(
                        "component interaction for app {} ignored",
                        interaction.application_id
                    );
                    return false;
                }
                let payload = match data.payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("undecodable custom id {:?}: {}", data.custom_id, e);
                        return false;
                    }
                };
                match self.component_handler.as_mut() {
                    Some(handler) => {
                        handler(ctx, interaction, &payload);
                        true
                    }
                    None => {
                        log::debug!("no component handler; click ignored");
                        false
                    }
                }
            }
            InteractionData::None => {
                log::trace!("interaction {:?} carries nothing to dispatch", interaction.kind);
                false
            }
        }
    }

    pub fn set_component_handler(
        &mut self,
        handler: impl FnMut(&mut C, &Interaction, &[u8]) + 'static,
    ) {
        self.component_handler = Some(Box::new(handler));
    }

    // Local-only map operations; none of these touch the remote side.

    /// Store `command` unless the name is taken. Returns whether it was stored.
    pub fn insert_if_absent(&mut self, command: Command<C>) -> bool {
        if self.commands.contains_key(command.name()) {
            return false;
        }
        self.commands.insert(command.name().to_string(), command);
        true
    }

    /// Replace the command with the same name. Returns false, and drops `command`, if there is
    /// none.
    pub fn set_if_present(&mut self, command: Command<C>) -> bool {
        match self.commands.get_mut(command.name()) {
            Some(slot) => {
                *slot = command;
                true
            }
            None => false,
        }
    }

    /// Store `command`, returning whatever it replaced.
    pub fn upsert(&mut self, command: Command<C>) -> Option<Command<C>> {
        self.commands.insert(command.name().to_string(), command)
    }

    pub fn get(&self, name: &str) -> Option<&Command<C>> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::commands::command::Invocation;
    use crate::commands::interaction::{CommandData, CommandOption, ComponentData};
    use crate::net::TransportError;
    use serde_json::json;

    /// Records calls and answers with a fixed status.
    struct FakeRemote {
        status: Option<u16>,
        calls: Vec<(Snowflake, Option<Snowflake>, Value)>,
    }

    impl FakeRemote {
        fn answering(status: u16) -> Self {
            Self {
                status: Some(status),
                calls: Vec::new(),
            }
        }

        fn unreachable() -> Self {
            Self {
                status: None,
                calls: Vec::new(),
            }
        }
    }

    impl CommandRemote for FakeRemote {
        fn create_command(
            &mut self,
            app_id: Snowflake,
            guild_id: Option<Snowflake>,
            body: &Value,
        ) -> Result<RestResponse, RestError> {
            self.calls.push((app_id, guild_id, body.clone()));
            match self.status {
                Some(status) => Ok(RestResponse {
                    status,
                    body: Some(json!({ "id": "1" })),
                }),
                None => Err(RestError::Transport(TransportError::Closed)),
            }
        }
    }

    #[derive(Default)]
    struct Calls {
        commands: Vec<String>,
        components: Vec<Vec<u8>>,
    }

    fn counting(name: &str) -> CommandSpec<Calls> {
        CommandSpec::new(name, "test", |calls: &mut Calls, inv: &Invocation<'_>| {
            calls.commands.push(inv.command.to_string())
        })
    }

    fn command_interaction(app: u64, name: &str, options: Vec<CommandOption>) -> Interaction {
        Interaction {
            id: Snowflake(10),
            application_id: Snowflake(app),
            kind: InteractionType::ApplicationCommand,
            data: InteractionData::Command(CommandData {
                id: Snowflake(11),
                name: name.to_string(),
                kind: 1,
                options,
                guild_id: None,
                target_id: None,
            }),
            guild_id: None,
            channel_id: None,
            actor: None,
            token: "t".to_string(),
        }
    }

    #[test]
    fn register_posts_then_stores() {
        let mut remote = FakeRemote::answering(201);
        let mut registry = CommandRegistry::new(Snowflake(42), Some(Snowflake(7)));

        let cmd = registry.register(&mut remote, counting("hello")).unwrap();
        assert_eq!(cmd.app_id(), Snowflake(42));
        assert_eq!(cmd.guild_id(), Some(Snowflake(7)));

        assert_eq!(remote.calls.len(), 1);
        assert_eq!(remote.calls[0].0, Snowflake(42));
        assert_eq!(remote.calls[0].1, Some(Snowflake(7)));
        assert_eq!(remote.calls[0].2["name"], "hello");
    }

    #[test]
    fn duplicate_registration_keeps_the_first() {
        let mut remote = FakeRemote::answering(200);
        let mut registry = CommandRegistry::new(Snowflake(42), None);
        registry.register(&mut remote, counting("hello")).unwrap();

        let second = registry.register(&mut remote, counting("hello"));
        assert!(matches!(second, Err(CommandError::Duplicate(name)) if name == "hello"));
        assert_eq!(remote.calls.len(), 1);
        assert_eq!(registry.len(), 1);

        let mut calls = Calls::default();
        assert!(registry.dispatch(&mut calls, &command_interaction(42, "hello", vec![])));
        assert_eq!(calls.commands, vec!["hello"]);
    }

    #[test]
    fn remote_failure_stores_nothing() {
        let mut registry = CommandRegistry::<Calls>::new(Snowflake(42), None);

        let mut rejecting = FakeRemote::answering(400);
        assert!(matches!(
            registry.register(&mut rejecting, counting("a")),
            Err(CommandError::Rejected { status: 400, .. })
        ));

        let mut unreachable = FakeRemote::unreachable();
        assert!(matches!(
            registry.register(&mut unreachable, counting("a")),
            Err(CommandError::Remote { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn mismatched_app_never_reaches_callback() {
        let mut remote = FakeRemote::answering(200);
        let mut registry = CommandRegistry::new(Snowflake(42), None);
        registry.register(&mut remote, counting("hello")).unwrap();

        let mut calls = Calls::default();
        assert!(!registry.dispatch(&mut calls, &command_interaction(99, "hello", vec![])));
        assert!(calls.commands.is_empty());
    }

    #[test]
    fn autocomplete_does_not_invoke_the_command() {
        let mut remote = FakeRemote::answering(200);
        let mut registry = CommandRegistry::new(Snowflake(42), None);
        registry.register(&mut remote, counting("hello")).unwrap();

        let mut typing = command_interaction(42, "hello", vec![]);
        typing.kind = InteractionType::Autocomplete;
        let mut calls = Calls::default();
        assert!(!registry.dispatch(&mut calls, &typing));
        assert!(calls.commands.is_empty());

        assert!(registry.dispatch(&mut calls, &command_interaction(42, "hello", vec![])));
        assert_eq!(calls.commands, vec!["hello"]);
    }

    #[test]
    fn unknown_command_is_ignored() {
        let mut registry = CommandRegistry::<Calls>::new(Snowflake(42), None);
        let mut calls = Calls::default();
        assert!(!registry.dispatch(&mut calls, &command_interaction(42, "nope", vec![])));
    }

    #[test]
    fn options_reach_the_callback() {
        let mut remote = FakeRemote::answering(200);
        let mut registry = CommandRegistry::new(Snowflake(42), None);
        let spec = CommandSpec::new("echo", "", |out: &mut Vec<String>, inv: &Invocation<'_>| {
            out.push(inv.options["x"].clone())
        });
        registry.register(&mut remote, spec).unwrap();

        let options = vec![
            CommandOption {
                name: "x".into(),
                kind: 3,
                value: json!("1"),
                focused: false,
            },
            CommandOption {
                name: "x".into(),
                kind: 3,
                value: json!("2"),
                focused: false,
            },
        ];
        let mut out = Vec::new();
        assert!(registry.dispatch(&mut out, &command_interaction(42, "echo", options)));
        assert_eq!(out, vec!["1;2"]);
    }

    #[test]
    fn component_clicks_get_decoded_payload() {
        let mut registry = CommandRegistry::<Calls>::new(Snowflake(42), None);
        let click = Interaction {
            id: Snowflake(1),
            application_id: Snowflake(42),
            kind: InteractionType::MessageComponent,
            data: InteractionData::Component(ComponentData {
                custom_id: codec::encode(&[0xff, 0x00, 0x10]),
                component_type: 2,
            }),
            guild_id: None,
            channel_id: None,
            actor: None,
            token: "t".into(),
        };

        let mut calls = Calls::default();
        assert!(!registry.dispatch(&mut calls, &click));

        registry.set_component_handler(|calls: &mut Calls, _, payload: &[u8]| {
            calls.components.push(payload.to_vec())
        });
        assert!(registry.dispatch(&mut calls, &click));
        assert_eq!(calls.components, vec![vec![0xff, 0x00, 0x10]]);
    }

    #[test]
    fn map_contracts() {
        let mut registry = CommandRegistry::<Calls>::new(Snowflake(1), None);
        let make = |name: &str| Command::new(counting(name), Snowflake(1), None);

        assert!(!registry.set_if_present(make("a")));
        assert!(registry.is_empty());

        assert!(registry.insert_if_absent(make("a")));
        assert!(!registry.insert_if_absent(make("a")));
        assert!(registry.set_if_present(make("a")));
        assert!(registry.upsert(make("a")).is_some());
        assert!(registry.upsert(make("b")).is_none());

        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
    }
}
