//! # Application Layer
//!
//! Contains the core logic of the bot engine: message history, channel
//! configuration, the operator log, the gateway lifecycle, command routing and
//! reply orchestration, composed behind the `BotService` façade.

pub mod backoff;
pub mod connection;
pub mod engine;
pub mod logging;
pub mod registry;
pub mod router;
pub mod service;
pub mod state;
pub mod store;
pub mod utils;
