//! # Strings Module
//!
//! Centralizes operator log lines, user-facing replies and prompt fragments.
//! Ensures consistency in messaging and easier updates.

pub mod logs;
pub mod messages;
pub mod prompts;
