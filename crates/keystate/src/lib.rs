//! # Keystate
//!
//! SQLite-backed state store for key convergence.
//!
//! Each managed key is one row. Every write is a single transaction, so a
//! key identifier is never stored without its phase or the other way round,
//! and the table itself refuses a `missing` row that carries an identifier.
//!
//! ## Example
//!
//! ```no_run
//! use convergence::StateStore;
//! use keystate::SqliteStore;
//! use std::path::Path;
//!
//! let store = SqliteStore::open(Path::new("/path/to/state.db"))?;
//! for state in store.all()? {
//!     println!("{}: {}", state.name, state.phase);
//! }
//! # Ok::<(), keystate::Error>(())
//! ```

mod error;

pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use convergence::{Phase, ResourceState, StateStore};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS keys (
        name TEXT PRIMARY KEY,
        phase TEXT NOT NULL CHECK (phase IN ('missing', 'starting', 'up')),
        key_id TEXT,
        region TEXT NOT NULL,
        access_key_id TEXT NOT NULL,
        policy TEXT NOT NULL,
        alias TEXT NOT NULL,
        key_usage TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        description TEXT NOT NULL,
        grants TEXT NOT NULL,
        updated_at INTEGER,
        CHECK ((phase = 'missing') = (key_id IS NULL))
    );

    CREATE INDEX IF NOT EXISTS idx_key_id ON keys(key_id);
";

const COLUMNS: &str = "name, phase, key_id, region, access_key_id, policy, alias, key_usage, \
                       enabled, description, grants, updated_at";

/// Persistent store of key states
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a state database at the given path
    ///
    /// Creates the database file and the table if they don't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path).map_err(|source| Error::Open {
            path: db_path.to_path_buf(),
            source,
        })?;
        log::debug!("opened state database {}", db_path.display());
        Self::init(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Get the state of one key
    pub fn get(&self, name: &str) -> Result<Option<ResourceState>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM keys WHERE name = ?1"),
                [name],
                RawState::from_row,
            )
            .optional()?;

        raw.map(RawState::into_state).transpose()
    }

    /// Write a state in one transaction
    ///
    /// Refuses to replace a recorded key identifier with a different one.
    pub fn put(&self, state: &ResourceState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let recorded: Option<Option<String>> = tx
            .query_row(
                "SELECT key_id FROM keys WHERE name = ?1",
                [&state.name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(Some(recorded)) = recorded
            && state.key_id.as_deref() != Some(recorded.as_str())
        {
            return Err(Error::KeyReassigned {
                name: state.name.clone(),
                recorded,
                proposed: state.key_id.clone().unwrap_or_else(|| "(none)".to_string()),
            });
        }

        let grants = serde_json::to_string(&state.grants)?;
        let updated_at = state.updated_at.map(|t| t.timestamp_millis());

        tx.execute(
            &format!(
                "INSERT INTO keys ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(name) DO UPDATE SET
                    phase = excluded.phase,
                    key_id = excluded.key_id,
                    region = excluded.region,
                    access_key_id = excluded.access_key_id,
                    policy = excluded.policy,
                    alias = excluded.alias,
                    key_usage = excluded.key_usage,
                    enabled = excluded.enabled,
                    description = excluded.description,
                    grants = excluded.grants,
                    updated_at = excluded.updated_at"
            ),
            params![
                state.name,
                state.phase.as_str(),
                state.key_id,
                state.region,
                state.access_key_id,
                state.policy,
                state.alias,
                state.key_usage,
                state.enabled,
                state.description,
                grants,
                updated_at,
            ],
        )?;

        tx.commit()?;
        log::debug!("recorded '{}' as {}", state.name, state.phase);
        Ok(())
    }

    /// All recorded states, ordered by name
    pub fn all(&self) -> Result<Vec<ResourceState>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM keys ORDER BY name"))?;
        let rows = stmt
            .query_map([], RawState::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RawState::into_state).collect()
    }

    /// Number of recorded keys
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM keys", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl StateStore for SqliteStore {
    fn load(&self, name: &str) -> kmskit::Result<Option<ResourceState>> {
        Ok(self.get(name)?)
    }

    fn save(&self, state: &ResourceState) -> kmskit::Result<()> {
        Ok(self.put(state)?)
    }

    fn list(&self) -> kmskit::Result<Vec<ResourceState>> {
        Ok(self.all()?)
    }
}

/// Row as stored, before parsing phase, grants and timestamp
struct RawState {
    name: String,
    phase: String,
    key_id: Option<String>,
    region: String,
    access_key_id: String,
    policy: String,
    alias: String,
    key_usage: String,
    enabled: bool,
    description: String,
    grants: String,
    updated_at: Option<i64>,
}

impl RawState {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            phase: row.get(1)?,
            key_id: row.get(2)?,
            region: row.get(3)?,
            access_key_id: row.get(4)?,
            policy: row.get(5)?,
            alias: row.get(6)?,
            key_usage: row.get(7)?,
            enabled: row.get(8)?,
            description: row.get(9)?,
            grants: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_state(self) -> Result<ResourceState> {
        let phase: Phase = self.phase.parse().map_err(|_| Error::Corrupt {
            name: self.name.clone(),
            message: format!("unknown phase '{}'", self.phase),
        })?;

        let updated_at = match self.updated_at {
            Some(millis) => Some(DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(
                || Error::Corrupt {
                    name: self.name.clone(),
                    message: format!("timestamp {millis} out of range"),
                },
            )?),
            None => None,
        };

        Ok(ResourceState {
            grants: serde_json::from_str(&self.grants)?,
            name: self.name,
            phase,
            key_id: self.key_id,
            region: self.region,
            access_key_id: self.access_key_id,
            policy: self.policy,
            alias: self.alias,
            key_usage: self.key_usage,
            enabled: self.enabled,
            description: self.description,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmskit::GrantSpec;
    use tempfile::TempDir;

    fn starting(name: &str, key_id: &str) -> ResourceState {
        ResourceState {
            phase: Phase::Starting,
            key_id: Some(key_id.to_string()),
            region: "us-east-1".to_string(),
            access_key_id: "AKIA1".to_string(),
            policy: "DEFAULT".to_string(),
            alias: "alias/app".to_string(),
            key_usage: "ENCRYPT/DECRYPT".to_string(),
            grants: vec![
                GrantSpec::new("role/app")
                    .with_operation("Decrypt")
                    .with_retiring_principal("role/admin"),
            ],
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_123),
            ..ResourceState::missing(name)
        }
    }

    #[test]
    fn test_open_creates_db() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("state").join("keys.db");

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(db_path.exists());
    }

    #[test]
    fn test_put_then_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = starting("app", "k-1");

        store.put(&state).unwrap();

        assert_eq!(store.get("app").unwrap(), Some(state));
        assert!(store.get("other").unwrap().is_none());
    }

    #[test]
    fn test_phase_advances_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = starting("app", "k-1");
        store.put(&state).unwrap();

        state.phase = Phase::Up;
        store.put(&state).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("app").unwrap().unwrap().phase, Phase::Up);
    }

    #[test]
    fn test_missing_with_key_is_rejected_by_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = starting("app", "k-1");
        state.phase = Phase::Missing;

        let err = store.put(&state).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(store.get("app").unwrap().is_none());
    }

    #[test]
    fn test_up_without_key_is_rejected_by_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = starting("app", "k-1");
        state.phase = Phase::Up;
        state.key_id = None;

        assert!(store.put(&state).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_key_id_is_never_reassigned() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&starting("app", "k-1")).unwrap();

        let err = store.put(&starting("app", "k-2")).unwrap_err();
        assert!(matches!(err, Error::KeyReassigned { .. }));
        assert_eq!(
            store.get("app").unwrap().unwrap().key_id.as_deref(),
            Some("k-1")
        );
    }

    #[test]
    fn test_all_is_ordered_by_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&starting("zeta", "k-2")).unwrap();
        store.put(&starting("alpha", "k-1")).unwrap();

        let names: Vec<_> = store.all().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("keys.db");
        let state = starting("app", "k-1");

        SqliteStore::open(&db_path).unwrap().put(&state).unwrap();

        let reopened = SqliteStore::open(&db_path).unwrap();
        assert_eq!(reopened.get("app").unwrap(), Some(state));
    }

    #[test]
    fn test_store_errors_are_fatal_for_the_engine() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&starting("app", "k-1")).unwrap();

        let err = StateStore::save(&store, &starting("app", "k-2")).unwrap_err();
        assert!(matches!(err, kmskit::Error::Persistence(_)));
        assert_eq!(err.class(), kmskit::ErrorClass::Fatal);
    }
}
