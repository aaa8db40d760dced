//! # Domain Layer
//!
//! Core definitions, types, and traits that define the business domain of the engine.
//! Independent of specific frameworks (mostly), serving as the contract for other layers.

pub mod config;
pub mod error;
pub mod paths;
pub mod traits;
pub mod types;
