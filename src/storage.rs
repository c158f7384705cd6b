use rusqlite::{params, Connection, OptionalExtension};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Which key-value store a read or write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Survives across sessions.
    Persistent,
    /// Cleared when the signed-in session ends.
    Session,
}

impl Scope {
    fn table(self) -> &'static str {
        match self {
            Scope::Persistent => "local_storage",
            Scope::Session => "session_storage",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Persistent => "persistent",
            Scope::Session => "session",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded ({used} of {limit} bytes)")]
    QuotaExceeded { used: usize, limit: usize },
    #[error("storage is unavailable")]
    Unavailable,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Raw key-value operations. Implementations report failures; `Storage` swallows them.
pub trait Backend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

// --- SQLite backend ---

pub struct SqliteBackend {
    conn: Connection,
    table: &'static str,
}

impl SqliteBackend {
    pub fn open(path: &Path, scope: Scope) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|_| StorageError::Unavailable)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, scope)
    }

    #[cfg(test)]
    pub fn in_memory(scope: Scope) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, scope)
    }

    fn with_connection(conn: Connection, scope: Scope) -> Result<Self, StorageError> {
        let table = scope.table();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#
        ))?;
        Ok(Self { conn, table })
    }
}

impl Backend for SqliteBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                self.table
            ),
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute(&format!("DELETE FROM {} WHERE key = ?1", self.table), [key])?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.conn.execute(&format!("DELETE FROM {}", self.table), [])?;
        Ok(())
    }
}

// --- In-memory backend ---

/// Map-backed store with an optional byte quota over keys plus values.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RefCell<HashMap<String, String>>,
    quota: Option<usize>,
    disabled: Cell<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_quota(limit: usize) -> Self {
        Self {
            quota: Some(limit),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        let backend = Self::default();
        backend.disabled.set(true);
        backend
    }

    /// Switches the backend on or off at runtime, as a browser does when storage
    /// is revoked mid-session.
    #[cfg(test)]
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.set(disabled);
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled.get() {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl Backend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let mut entries = self.entries.borrow_mut();
        if let Some(limit) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let used = others + key.len() + value.len();
            if used > limit {
                return Err(StorageError::QuotaExceeded { used, limit });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.entries.borrow_mut().clear();
        Ok(())
    }
}

// --- Adapter ---

/// Uniform get/set/remove over both scopes. Never fails: backend errors are
/// logged and the call turns into a no-op.
pub struct Storage {
    persistent: Box<dyn Backend>,
    session: Box<dyn Backend>,
}

impl Storage {
    pub fn new(persistent: Box<dyn Backend>, session: Box<dyn Backend>) -> Self {
        Self { persistent, session }
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::new(
            Box::new(SqliteBackend::open(path, Scope::Persistent)?),
            Box::new(SqliteBackend::open(path, Scope::Session)?),
        ))
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), Box::new(MemoryBackend::new()))
    }

    fn backend(&self, scope: Scope) -> &dyn Backend {
        match scope {
            Scope::Persistent => self.persistent.as_ref(),
            Scope::Session => self.session.as_ref(),
        }
    }

    pub fn get(&self, scope: Scope, key: &str) -> Option<String> {
        match self.backend(scope).read(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(scope = scope.as_str(), key, error = %e, "Storage read failed");
                None
            }
        }
    }

    pub fn set(&self, scope: Scope, key: &str, value: &str) -> bool {
        match self.backend(scope).write(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    scope = scope.as_str(),
                    key,
                    bytes = value.len(),
                    error = %e,
                    "Write not persisted"
                );
                false
            }
        }
    }

    pub fn remove(&self, scope: Scope, key: &str) -> bool {
        match self.backend(scope).delete(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(scope = scope.as_str(), key, error = %e, "Remove not persisted");
                false
            }
        }
    }

    pub fn clear(&self, scope: Scope) -> bool {
        match self.backend(scope).clear() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(scope = scope.as_str(), error = %e, "Clear not persisted");
                false
            }
        }
    }
}
