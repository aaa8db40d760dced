//! # LLM Client
//!
//! Implementations of the `ChatCompletion` trait.

mod openai;

pub use openai::OpenAiClient;
