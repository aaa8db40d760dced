//! # Interface Layer
//!
//! The control surface a host process drives the engine through.

pub mod panel;
