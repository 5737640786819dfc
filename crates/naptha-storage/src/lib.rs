//! Storage Client: writes and reads run artifacts on a node, optionally
//! content addressed (`sha256:<hex>`).

pub mod backend;
pub mod client;
pub mod http;
pub mod id;

pub use backend::{MemoryStorage, StorageBackend};
pub use client::StorageClient;
pub use http::HttpStorage;
pub use id::StorageId;
