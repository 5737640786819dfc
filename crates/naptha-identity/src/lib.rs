//! Caller identity: holds the Ed25519 signing key used to authenticate
//! run submissions to nodes and registrations with the Hub.

pub mod identity;

pub use identity::{verify, Identity};
