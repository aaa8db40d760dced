//! # Infrastructure Layer
//!
//! Handles interactions with external systems and services.
//! Implements the traits defined in the Domain layer (`Gateway`, `ChatCompletion`).

pub mod discord;
pub mod llm;
