//! Node run protocol: wire types, the `NodeTransport` seam, and the
//! reqwest-backed HTTP client used against real worker nodes.

pub mod client;
pub mod transport;
pub mod types;

pub use client::HttpNodeClient;
pub use transport::NodeTransport;
pub use types::*;
