//! # relaybot
//!
//! A Discord chat-relay engine: listens on configured channels, keeps
//! per-channel conversation memory and answers through an OpenAI-compatible
//! chat-completion endpoint.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod strings;

#[cfg(test)]
mod testing;
