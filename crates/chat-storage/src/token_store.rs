//! High-level API for the persisted login session.

use crate::{SecureStorage, StorageKeys, StorageResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Snapshot of the persisted session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub user: Option<Value>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none() && self.user.is_none()
    }
}

/// Partial update applied by [`TokenStore::save`]. Fields left `None` keep
/// whatever is already stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUpdate {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub user: Option<Value>,
}

impl TokenUpdate {
    pub fn tokens(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
            user: None,
        }
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }
}

/// Single owner of durable session state.
pub struct TokenStore {
    storage: Box<dyn SecureStorage>,
}

impl TokenStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Persist every non-empty field of `update`.
    pub fn save(&self, update: &TokenUpdate) -> StorageResult<()> {
        if let Some(access) = non_empty(update.access.as_deref()) {
            self.storage.set(StorageKeys::ACCESS_TOKEN, access)?;
        }
        if let Some(refresh) = non_empty(update.refresh.as_deref()) {
            self.storage.set(StorageKeys::REFRESH_TOKEN, refresh)?;
        }
        if let Some(user) = update.user.as_ref().filter(|user| !user.is_null()) {
            let json = serde_json::to_string(user)?;
            self.storage.set(StorageKeys::USER, &json)?;
        }

        debug!(
            access = update.access.is_some(),
            refresh = update.refresh.is_some(),
            user = update.user.is_some(),
            "session saved"
        );
        Ok(())
    }

    /// Read the current session. Never fails: unreadable entries come back
    /// as `None`.
    pub fn load(&self) -> StoredSession {
        let access = self.read(StorageKeys::ACCESS_TOKEN);
        let refresh = self.read(StorageKeys::REFRESH_TOKEN);
        let user = self
            .read(StorageKeys::USER)
            .and_then(|raw| match serde_json::from_str::<Value>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "stored user is not valid JSON, ignoring");
                    None
                }
            });

        StoredSession {
            access,
            refresh,
            user,
        }
    }

    /// Access token only.
    pub fn access_token(&self) -> Option<String> {
        self.read(StorageKeys::ACCESS_TOKEN)
    }

    /// Refresh token only.
    pub fn refresh_token(&self) -> Option<String> {
        self.read(StorageKeys::REFRESH_TOKEN)
    }

    /// Remove every session entry. Safe to call on an empty store.
    pub fn clear(&self) -> StorageResult<()> {
        let mut first_error = None;
        for key in StorageKeys::ALL {
            if let Err(e) = self.storage.delete(key) {
                warn!(key, error = %e, "failed to delete session entry");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("session cleared");
                Ok(())
            }
        }
    }

    pub fn has_session(&self) -> bool {
        self.access_token().is_some()
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "failed to read session entry");
                None
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
