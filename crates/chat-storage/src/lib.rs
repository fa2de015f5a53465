//! Session persistence for the chatapp client.
//!
//! The [`TokenStore`] is the only component that touches durable session
//! state. It sits on top of a [`SecureStorage`] backend:
//! - [`FileStorage`]: a JSON file, `~/.chatapp/session.json` by default
//! - [`MemoryStorage`]: process-local, for tests and throwaway sessions

mod file;
mod keys;
mod memory;
mod token_store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use token_store::{StoredSession, TokenStore, TokenUpdate};
pub use traits::SecureStorage;

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create a TokenStore persisted to the given session file.
pub fn create_token_store(session_file: &Path) -> TokenStore {
    TokenStore::new(Box::new(FileStorage::new(session_file)))
}

/// Create a TokenStore that forgets everything when dropped.
pub fn create_memory_token_store() -> TokenStore {
    TokenStore::new(Box::new(MemoryStorage::new()))
}
