//! ferrocord: a poll-driven chat bot client.
//!
//! A single thread owns everything. Each tick drives the REST multiplexer, then the gateway
//! connection, then routes whatever events arrived.

pub mod bot;
pub mod codec;
pub mod commands;
pub mod config;
pub mod gateway;
pub mod net;
pub mod rest;
pub mod snowflake;

pub use bot::{Bot, BotContext, BotError, BotSpec, EventHandlers, Ready};
pub use snowflake::Snowflake;
