//! Naptha Core: data model, error taxonomy, configuration, backoff policy.

pub mod backoff;
pub mod config;
pub mod error;
pub mod params;
pub mod types;

pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use config::{ClientConfig, DataPaths, RetrySettings};
pub use error::{Error, Result};
pub use params::Params;
pub use types::*;
