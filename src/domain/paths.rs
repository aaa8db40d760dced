//! # Data Paths
//!
//! Default locations of the files the engine reads and writes.

pub const DATA_DIR: &str = "data";
pub const CONFIG_FILE: &str = "data/config.yaml";
pub const STATE_FILE: &str = "data/state.json";
pub const SESSION_LOG: &str = "session.log";
