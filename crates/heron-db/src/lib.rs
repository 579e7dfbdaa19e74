pub mod comments;
pub mod conversations;
pub mod follows;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use anyhow::Result;
use heron_types::error::{SocialError, SocialResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private scratch database; used by tests and local tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> SocialResult<T>
    where
        F: FnOnce(&Connection) -> SocialResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SocialError::unavailable_msg("db lock poisoned"))?;
        f(&conn)
    }

    /// Variant handing out `&mut Connection` so callers can open an
    /// explicit transaction. Every multi-row mutation goes through here.
    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> SocialResult<T>
    where
        F: FnOnce(&mut Connection) -> SocialResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SocialError::unavailable_msg("db lock poisoned"))?;
        f(&mut conn)
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Maps unexpected storage failures to the retryable `Unavailable` outcome,
/// logging the operation name so the failed transaction can be
/// reconstructed. Domain outcomes (NotFound, Conflict, ...) never pass
/// through here.
pub(crate) trait StoreExt<T> {
    fn store_err(self, operation: &'static str) -> SocialResult<T>;
}

impl<T> StoreExt<T> for Result<T, rusqlite::Error> {
    fn store_err(self, operation: &'static str) -> SocialResult<T> {
        self.map_err(|e| {
            error!(operation, error = %e, "unexpected storage failure");
            SocialError::unavailable(e)
        })
    }
}

/// True when the error is a UNIQUE/PRIMARY KEY constraint violation, the
/// signal both idempotent-creation races and duplicate follows key off.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Database;
    use uuid::Uuid;

    pub fn db() -> Database {
        Database::open_in_memory().expect("in-memory db")
    }

    pub fn user(db: &Database, handle: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, handle, handle, "hash")
            .expect("create user");
        id
    }

    /// Both directed edges, so the pair passes the mutual-follow gate.
    pub fn make_mutual(db: &Database, a: Uuid, b: Uuid) {
        db.follow(a, b).expect("follow a->b");
        db.follow(b, a).expect("follow b->a");
    }
}
