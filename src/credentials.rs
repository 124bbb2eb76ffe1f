//! Credential storage and the in-memory API key / model pair.
//!
//! The store is a namespaced key-value collaborator. [`SqliteStore`] persists
//! to a single SQLite table; [`MemoryStore`] keeps values for the life of the
//! process.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Namespace holding the LLM settings
pub const LLM_NAMESPACE: &str = "llm_config";

/// Key of the API key entry
pub const API_KEY_KEY: &str = "api_key";

/// Key of the model entry
pub const MODEL_KEY: &str = "model";

/// Longest API key kept, in bytes
pub const MAX_API_KEY_LEN: usize = 127;

/// Longest model identifier kept, in bytes
pub const MAX_MODEL_LEN: usize = 63;

/// Credential store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Namespaced string key-value store
pub trait CredentialStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;
}

/// SQLite-backed store.
///
/// rusqlite::Connection is not Sync, so access goes through a Mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Volatile database, mostly for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )?;
        Ok(())
    }
}

impl CredentialStore for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (namespace, key, value) VALUES (?1, ?2, ?3)",
            params![namespace, key, value],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

/// Cut `s` to at most `max` bytes on a char boundary
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// API key and model used for requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    model: String,
}

impl Credentials {
    /// Create credentials, cutting both values to their length bounds
    pub fn new(api_key: impl AsRef<str>, model: impl AsRef<str>) -> Self {
        Self {
            api_key: truncate_str(api_key.as_ref(), MAX_API_KEY_LEN).to_string(),
            model: truncate_str(model.as_ref(), MAX_MODEL_LEN).to_string(),
        }
    }

    /// Load from `store`, falling back to `default_model` when no model is saved
    pub fn load(store: &dyn CredentialStore, default_model: &str) -> Result<Self, StoreError> {
        let api_key = store.get(LLM_NAMESPACE, API_KEY_KEY)?.unwrap_or_default();
        let model = store
            .get(LLM_NAMESPACE, MODEL_KEY)?
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_model.to_string());

        let credentials = Self::new(api_key, model);
        if credentials.has_api_key() {
            info!("LLM credentials loaded (model: {})", credentials.model);
        } else {
            warn!("No API key. Use: clawchat set-api-key <KEY>");
        }
        Ok(credentials)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub(crate) fn replace_api_key(&mut self, api_key: &str) {
        self.api_key = api_key.to_string();
    }

    pub(crate) fn replace_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    /// Key with everything but the last four characters masked
    pub fn masked_api_key(&self) -> String {
        let visible: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let hidden = self.api_key.chars().count() - visible.chars().count();
        format!("{}{}", "*".repeat(hidden), visible)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("has_api_key", &self.has_api_key())
            .field("model", &self.model)
            .finish()
    }
}
