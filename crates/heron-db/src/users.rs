use heron_types::error::{SocialError, SocialResult};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::models::{UserRow, format_ts, now_ts, parse_ts, parse_uuid};
use crate::{Database, OptionalExt, StoreExt, is_unique_violation};
use heron_types::models::User;

impl Database {
    pub fn create_user(
        &self,
        id: Uuid,
        handle: &str,
        display_name: &str,
        password_hash: &str,
    ) -> SocialResult<()> {
        self.with_conn(|conn| {
            let res = conn.execute(
                "INSERT INTO users (id, handle, display_name, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    handle,
                    display_name,
                    password_hash,
                    format_ts(now_ts())
                ],
            );
            match res {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    Err(SocialError::Conflict("handle already taken"))
                }
                Err(e) => Err(e).store_err("create_user"),
            }
        })
    }

    pub fn get_user_by_handle(&self, handle: &str) -> SocialResult<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_handle(conn, handle).store_err("get_user_by_handle"))
    }

    /// Public projection of one user; the password hash never leaves the
    /// store through this path.
    pub fn get_profile(&self, id: Uuid) -> SocialResult<User> {
        self.with_conn(|conn| {
            let row = query_user_by_id(conn, id).store_err("get_profile")?;
            let row = row.ok_or(SocialError::NotFound("user"))?;
            Ok(User {
                id: parse_uuid(&row.id),
                handle: row.handle,
                display_name: row.display_name,
                avatar_ref: row.avatar_ref,
                followers_count: row.followers_count,
                following_count: row.following_count,
                created_at: parse_ts(&row.created_at),
            })
        })
    }

    pub fn user_exists(&self, id: Uuid) -> SocialResult<bool> {
        self.with_conn(|conn| user_exists(conn, id).store_err("user_exists"))
    }
}

pub(crate) fn user_exists(conn: &Connection, id: Uuid) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [id.to_string()],
        |row| row.get(0),
    )
}

fn query_user_by_handle(conn: &Connection, handle: &str) -> rusqlite::Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, handle, display_name, avatar_ref, password,
                followers_count, following_count, created_at
         FROM users WHERE handle = ?1",
    )?;
    stmt.query_row([handle], map_user_row).optional()
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, handle, display_name, avatar_ref, password,
                followers_count, following_count, created_at
         FROM users WHERE id = ?1",
    )?;
    stmt.query_row([id.to_string()], map_user_row).optional()
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        handle: row.get(1)?,
        display_name: row.get(2)?,
        avatar_ref: row.get(3)?,
        password: row.get(4)?,
        followers_count: row.get(5)?,
        following_count: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn duplicate_handle_conflicts() {
        let db = testutil::db();
        testutil::user(&db, "wren");

        let err = db
            .create_user(Uuid::new_v4(), "wren", "Other Wren", "hash")
            .unwrap_err();
        assert!(matches!(err, SocialError::Conflict(_)));
    }

    #[test]
    fn new_profile_starts_with_zero_counters() {
        let db = testutil::db();
        let id = testutil::user(&db, "ibis");

        let profile = db.get_profile(id).unwrap();
        assert_eq!(profile.handle, "ibis");
        assert_eq!(profile.followers_count, 0);
        assert_eq!(profile.following_count, 0);
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let db = testutil::db();
        let err = db.get_profile(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SocialError::NotFound("user")));
    }
}
