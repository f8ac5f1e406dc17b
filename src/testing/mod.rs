//! Testing utilities and mock implementations
//!
//! Lets pipelines and gates run in tests without LLM providers, HTTP
//! endpoints or external stores.

pub mod mocks;

pub use mocks::*;
