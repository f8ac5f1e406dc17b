//! Builtin tools

pub mod http_fetch;

pub use http_fetch::HttpFetchTool;
