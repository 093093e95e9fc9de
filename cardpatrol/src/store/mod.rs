//! Persistence backends for the documents the patrol mutates.
//!
//! Every document (scrape configuration, ledger, recording rules) is an opaque
//! byte blob to the core. The format belongs to whoever reads it.

use async_trait::async_trait;

use crate::Result;

mod configmap;
mod file;
mod memory;

pub use configmap::{ConfigMapStore, InClusterConfig};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Number of attempts an adapter makes before giving up on a write conflict.
pub const WRITE_ATTEMPTS: usize = 5;

/// Read/write access to one persisted document.
#[async_trait]
pub trait Configurator: Send + Sync {
    /// Returns the whole document. A document that does not exist yet reads as
    /// empty.
    async fn read(&self) -> Result<Vec<u8>>;

    /// Replaces the whole document.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Human readable location, used in logs and errors.
    fn location(&self) -> String;
}
