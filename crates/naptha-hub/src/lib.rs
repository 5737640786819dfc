//! Hub Client: thin wrapper over the module registry.

pub mod client;
pub mod types;

pub use client::HubClient;
pub use types::{HubSession, ModuleRecord};
