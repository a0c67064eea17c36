//! The bot: one REST sender, one gateway connection and a command registry, advanced together by
//! a single-threaded tick loop.

use crate::commands::{CommandError, CommandRegistry, CommandSpec, Interaction, User};
use crate::config::{Config, Credentials};
use crate::gateway::{
    Clock, DispatchEvent, Gateway, GatewayError, GatewayOptions, IdentifyProperties, Intents,
    SystemClock,
};
use crate::net::{FrameTransport, NetContext, StreamingSession};
use crate::rest::{RestError, RestSender};
use crate::snowflake::Snowflake;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadyApplication {
    pub id: Snowflake,
}

/// Payload of the READY dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub application: Option<ReadyApplication>,
}

impl Ready {
    pub fn parse(data: &Value) -> Option<Ready> {
        match Ready::deserialize(data) {
            Ok(ready) => Some(ready),
            Err(e) => {
                log::error!("unusable READY payload: {}", e);
                None
            }
        }
    }
}

/// What event handlers get to work with. Commands registered through it are invoked with the
/// bot's `RestSender` as their context.
pub struct BotContext<'a> {
    pub rest: &'a mut RestSender,
    pub commands: &'a mut CommandRegistry<RestSender>,
    pub credentials: &'a Credentials,
}

impl BotContext<'_> {
    pub fn register_command(&mut self, spec: CommandSpec<RestSender>) -> Result<(), CommandError> {
        self.commands.register(&mut *self.rest, spec).map(|_| ())
    }
}

pub type ReadyHandler = Box<dyn FnMut(&mut BotContext<'_>, &Ready)>;
pub type InteractionHandler = Box<dyn FnMut(&mut BotContext<'_>, &Interaction)>;
pub type DispatchHandler = Box<dyn FnMut(&mut BotContext<'_>, &Value)>;
pub type ErrorHandler = Box<dyn FnMut(&BotError)>;

/// Application callbacks. Which ones are set decides the intents requested at identify.
#[derive(Default)]
pub struct EventHandlers {
    ready: Option<ReadyHandler>,
    interaction: Option<InteractionHandler>,
    message: Option<DispatchHandler>,
    guild_create: Option<DispatchHandler>,
    error: Option<ErrorHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ready(mut self, f: impl FnMut(&mut BotContext<'_>, &Ready) + 'static) -> Self {
        self.ready = Some(Box::new(f));
        self
    }

    /// Runs before the interaction is routed to the command registry.
    pub fn on_interaction(
        mut self,
        f: impl FnMut(&mut BotContext<'_>, &Interaction) + 'static,
    ) -> Self {
        self.interaction = Some(Box::new(f));
        self
    }

    pub fn on_message(mut self, f: impl FnMut(&mut BotContext<'_>, &Value) + 'static) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_guild_create(
        mut self,
        f: impl FnMut(&mut BotContext<'_>, &Value) + 'static,
    ) -> Self {
        self.guild_create = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&BotError) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Only categories some handler consumes. Interactions and READY need none.
    pub fn intents(&self) -> Intents {
        let mut intents = Intents::empty();
        if self.guild_create.is_some() {
            intents |= Intents::GUILDS;
        }
        if self.message.is_some() {
            intents |= Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES | Intents::MESSAGE_CONTENT;
        }
        intents
    }
}

pub struct BotSpec {
    pub config: Config,
    pub credentials: Credentials,
    pub handlers: EventHandlers,
}

pub struct Bot<T: FrameTransport = StreamingSession, K: Clock = SystemClock> {
    gateway: Gateway<T, K>,
    rest: RestSender,
    commands: CommandRegistry<RestSender>,
    credentials: Credentials,
    handlers: EventHandlers,
    tick_interval: Duration,
}

impl Bot<StreamingSession, SystemClock> {
    /// Build the REST sender, look up the gateway endpoint and connect. Blocks until connected;
    /// any failure fails construction.
    pub fn create(ctx: &NetContext, spec: BotSpec) -> Result<Self, BotError> {
        let BotSpec {
            config,
            credentials,
            handlers,
        } = spec;

        let mut rest = RestSender::new(ctx, config.rest(), credentials.token.clone())?;
        let url = rest.resolve_streaming_url()?;
        log::info!("gateway endpoint: {}", url);

        let options = GatewayOptions {
            token: credentials.token.clone(),
            intents: handlers.intents(),
            properties: IdentifyProperties::default(),
            max_partial_bytes: config.max_partial_frame_bytes,
        };
        let gateway = Gateway::connect(ctx, &url, config.api_version, options)?;

        Ok(Bot::with_gateway(
            gateway,
            rest,
            credentials,
            handlers,
            config.tick_interval(),
        ))
    }
}

impl<T: FrameTransport, K: Clock> Bot<T, K> {
    /// Assemble a bot from an already connected gateway.
    pub fn with_gateway(
        gateway: Gateway<T, K>,
        rest: RestSender,
        credentials: Credentials,
        handlers: EventHandlers,
        tick_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            rest,
            commands: CommandRegistry::new(credentials.app_id, credentials.guild_scope),
            credentials,
            handlers,
            tick_interval,
        }
    }

    pub fn gateway(&self) -> &Gateway<T, K> {
        &self.gateway
    }

    pub fn rest_mut(&mut self) -> &mut RestSender {
        &mut self.rest
    }

    pub fn commands(&self) -> &CommandRegistry<RestSender> {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut CommandRegistry<RestSender> {
        &mut self.commands
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Register a command remotely and locally.
    pub fn register_command(&mut self, spec: CommandSpec<RestSender>) -> Result<(), BotError> {
        self.commands.register(&mut self.rest, spec)?;
        Ok(())
    }

    /// One step: complete REST exchanges, receive gateway frames, route dispatches.
    pub fn tick(&mut self) -> Result<(), BotError> {
        if let Err(e) = self.rest.poll() {
            return Err(self.report(e.into()));
        }
        let events = match self.gateway.poll() {
            Ok(events) => events,
            Err(e) => return Err(self.report(e.into())),
        };
        for event in events {
            self.route(event);
        }
        Ok(())
    }

    /// Tick until `running` is cleared or a tick fails, then close the connection.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), BotError> {
        log::info!("bot running");
        let mut result = Ok(());
        while running.load(Ordering::SeqCst) {
            if let Err(e) = self.tick() {
                result = Err(e);
                break;
            }
            std::thread::sleep(self.tick_interval);
        }
        self.shutdown();
        result
    }

    /// Close handshake, then abandon outstanding REST exchanges.
    pub fn shutdown(&mut self) {
        log::info!("shutting down");
        if let Err(e) = self.gateway.close(1000, "shutting down") {
            log::warn!("gateway close failed: {}", e);
        }
        self.rest.shutdown();
    }

    fn report(&mut self, error: BotError) -> BotError {
        log::error!("{}", error);
        if let Some(handler) = self.handlers.error.as_mut() {
            handler(&error);
        }
        error
    }

    fn route(&mut self, event: DispatchEvent) {
        match event.name.as_str() {
            "READY" => self.on_ready(&event.data),
            "INTERACTION_CREATE" => self.on_interaction(&event.data),
            "MESSAGE_CREATE" => {
                if let Some(handler) = self.handlers.message.as_mut() {
                    let mut ctx = BotContext {
                        rest: &mut self.rest,
                        commands: &mut self.commands,
                        credentials: &self.credentials,
                    };
                    handler(&mut ctx, &event.data);
                }
            }
            "GUILD_CREATE" => {
                if let Some(handler) = self.handlers.guild_create.as_mut() {
                    let mut ctx = BotContext {
                        rest: &mut self.rest,
                        commands: &mut self.commands,
                        credentials: &self.credentials,
                    };
                    handler(&mut ctx, &event.data);
                }
            }
            other => log::trace!("unhandled dispatch {}", other),
        }
    }

    fn on_ready(&mut self, data: &Value) {
        let Some(ready) = Ready::parse(data) else {
            return;
        };
        match &ready.user {
            Some(user) => log::info!("ready as {} ({})", user.username, user.id),
            None => log::info!("ready"),
        }
        self.gateway
            .record_session(ready.session_id.clone(), ready.resume_gateway_url.clone());

        if let Some(handler) = self.handlers.ready.as_mut() {
            let mut ctx = BotContext {
                rest: &mut self.rest,
                commands: &mut self.commands,
                credentials: &self.credentials,
            };
            handler(&mut ctx, &ready);
        }
    }

    fn on_interaction(&mut self, data: &Value) {
        let Some(interaction) = Interaction::parse(data) else {
            log::warn!("dropping unparsable interaction");
            return;
        };
        log::debug!("interaction {} ({:?})", interaction.id, interaction.kind);

        if let Some(handler) = self.handlers.interaction.as_mut() {
            let mut ctx = BotContext {
                rest: &mut self.rest,
                commands: &mut self.commands,
                credentials: &self.credentials,
            };
            handler(&mut ctx, &interaction);
        }
        self.commands.dispatch(&mut self.rest, &interaction);
    }
}
