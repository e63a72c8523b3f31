//! Content-addressable cache server with pluggable storage backends
//!
//! Clients upload and download opaque byte blobs keyed by a 64-bit hash
//! over a small binary TCP protocol; a UDP broadcast/reply mechanism lets
//! them find the server without prior configuration. The same wire
//! protocol is served whether blobs live in memory, in an embedded ordered
//! key-value file, or in a relational database.

pub mod config;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod storage;

pub use config::{Config, Driver};
pub use server::CacheServer;
pub use shutdown::ShutdownFlag;
pub use storage::{Database, Session, StorageError};
