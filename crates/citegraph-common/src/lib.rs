//! citegraph-common — Shared types, errors, configuration, and the outbound
//! HTTP broker used across all citegraph crates.

pub mod config;
pub mod entities;
pub mod error;
pub mod http;
pub mod ident;

// Re-export commonly used types
pub use config::Settings;
pub use error::{CitegraphError, ErrorKind, Result};
pub use http::{DestClass, RequestBroker, RequestError, RequestErrorKind};
