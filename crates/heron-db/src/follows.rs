use heron_types::api::FollowerProfile;
use heron_types::error::{SocialError, SocialResult};
use rusqlite::{Connection, params};
use tracing::error;
use uuid::Uuid;

use crate::models::{format_ts, now_ts, parse_ts, parse_uuid};
use crate::users::user_exists;
use crate::{Database, StoreExt, is_unique_violation};

impl Database {
    /// Insert the directed edge follower -> target and bump both
    /// denormalized counters in one transaction; the edge and the counters
    /// are never observably out of step.
    pub fn follow(&self, follower: Uuid, target: Uuid) -> SocialResult<()> {
        if follower == target {
            return Err(SocialError::SelfAction);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().store_err("follow")?;

            if !user_exists(&tx, target).store_err("follow")? {
                return Err(SocialError::NotFound("user"));
            }

            let inserted = tx.execute(
                "INSERT INTO follows (follower_id, following_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    follower.to_string(),
                    target.to_string(),
                    format_ts(now_ts())
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(SocialError::Conflict("already following"));
                }
                Err(e) => return Err(e).store_err("follow"),
            }

            tx.execute(
                "UPDATE users SET following_count = following_count + 1 WHERE id = ?1",
                [follower.to_string()],
            )
            .store_err("follow")?;
            tx.execute(
                "UPDATE users SET followers_count = followers_count + 1 WHERE id = ?1",
                [target.to_string()],
            )
            .store_err("follow")?;

            tx.commit().store_err("follow")
        })
        .inspect_err(|e| {
            if matches!(e, SocialError::Unavailable(_)) {
                error!(%follower, %target, "follow transaction failed");
            }
        })
    }

    /// Remove the edge and decrement both counters, floored at zero. The
    /// floor tolerates pre-existing drift; it is not a substitute for the
    /// transaction boundary.
    pub fn unfollow(&self, follower: Uuid, target: Uuid) -> SocialResult<()> {
        if follower == target {
            return Err(SocialError::SelfAction);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().store_err("unfollow")?;

            let deleted = tx
                .execute(
                    "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                    params![follower.to_string(), target.to_string()],
                )
                .store_err("unfollow")?;
            if deleted == 0 {
                return Err(SocialError::NotFound("follow edge"));
            }

            tx.execute(
                "UPDATE users SET following_count = MAX(following_count - 1, 0) WHERE id = ?1",
                [follower.to_string()],
            )
            .store_err("unfollow")?;
            tx.execute(
                "UPDATE users SET followers_count = MAX(followers_count - 1, 0) WHERE id = ?1",
                [target.to_string()],
            )
            .store_err("unfollow")?;

            tx.commit().store_err("unfollow")
        })
        .inspect_err(|e| {
            if matches!(e, SocialError::Unavailable(_)) {
                error!(%follower, %target, "unfollow transaction failed");
            }
        })
    }

    pub fn is_following(&self, a: Uuid, b: Uuid) -> SocialResult<bool> {
        self.with_conn(|conn| edge_exists(conn, a, b).store_err("is_following"))
    }

    /// True iff both directed edges exist; the precondition for opening a
    /// direct conversation.
    pub fn is_mutual(&self, a: Uuid, b: Uuid) -> SocialResult<bool> {
        self.with_conn(|conn| is_mutual(conn, a, b).store_err("is_mutual"))
    }

    pub fn list_followers(&self, user: Uuid) -> SocialResult<Vec<FollowerProfile>> {
        self.with_conn(|conn| {
            query_follow_profiles(
                conn,
                "SELECT u.id, u.display_name, u.handle, u.avatar_ref, f.created_at
                 FROM follows f
                 JOIN users u ON u.id = f.follower_id
                 WHERE f.following_id = ?1
                 ORDER BY f.created_at DESC, u.id DESC",
                user,
            )
            .store_err("list_followers")
        })
    }

    pub fn list_following(&self, user: Uuid) -> SocialResult<Vec<FollowerProfile>> {
        self.with_conn(|conn| {
            query_follow_profiles(
                conn,
                "SELECT u.id, u.display_name, u.handle, u.avatar_ref, f.created_at
                 FROM follows f
                 JOIN users u ON u.id = f.following_id
                 WHERE f.follower_id = ?1
                 ORDER BY f.created_at DESC, u.id DESC",
                user,
            )
            .store_err("list_following")
        })
    }
}

pub(crate) fn edge_exists(conn: &Connection, a: Uuid, b: Uuid) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
        params![a.to_string(), b.to_string()],
        |row| row.get(0),
    )
}

pub(crate) fn is_mutual(conn: &Connection, a: Uuid, b: Uuid) -> rusqlite::Result<bool> {
    Ok(edge_exists(conn, a, b)? && edge_exists(conn, b, a)?)
}

/// JOIN keeps the listing a single query rather than per-edge profile
/// lookups.
fn query_follow_profiles(
    conn: &Connection,
    sql: &str,
    user: Uuid,
) -> rusqlite::Result<Vec<FollowerProfile>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([user.to_string()], |row| {
            let id: String = row.get(0)?;
            let followed_at: String = row.get(4)?;
            Ok(FollowerProfile {
                id: parse_uuid(&id),
                display_name: row.get(1)?,
                handle: row.get(2)?,
                avatar_ref: row.get(3)?,
                followed_at: parse_ts(&followed_at),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn counters(db: &Database, id: Uuid) -> (i64, i64) {
        let p = db.get_profile(id).unwrap();
        (p.followers_count, p.following_count)
    }

    #[test]
    fn follow_then_unfollow_restores_counters_exactly() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");

        let before_a = counters(&db, a);
        let before_b = counters(&db, b);

        db.follow(a, b).unwrap();
        assert_eq!(counters(&db, a), (before_a.0, before_a.1 + 1));
        assert_eq!(counters(&db, b), (before_b.0 + 1, before_b.1));
        assert!(db.is_following(a, b).unwrap());
        assert!(!db.is_following(b, a).unwrap());

        db.unfollow(a, b).unwrap();
        assert_eq!(counters(&db, a), before_a);
        assert_eq!(counters(&db, b), before_b);
        assert!(!db.is_following(a, b).unwrap());
    }

    #[test]
    fn self_follow_is_rejected() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        assert!(matches!(db.follow(a, a), Err(SocialError::SelfAction)));
        assert!(matches!(db.unfollow(a, a), Err(SocialError::SelfAction)));
    }

    #[test]
    fn double_follow_conflicts_and_counts_once() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");

        db.follow(a, b).unwrap();
        let err = db.follow(a, b).unwrap_err();
        assert!(matches!(err, SocialError::Conflict(_)));

        assert_eq!(counters(&db, a), (0, 1));
        assert_eq!(counters(&db, b), (1, 0));
    }

    #[test]
    fn follow_unknown_target_is_not_found() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let err = db.follow(a, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SocialError::NotFound("user")));
        assert_eq!(counters(&db, a), (0, 0));
    }

    #[test]
    fn unfollow_without_edge_is_not_found() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");
        let err = db.unfollow(a, b).unwrap_err();
        assert!(matches!(err, SocialError::NotFound(_)));
        assert_eq!(counters(&db, a), (0, 0));
        assert_eq!(counters(&db, b), (0, 0));
    }

    #[test]
    fn mutual_requires_both_edges() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");

        assert!(!db.is_mutual(a, b).unwrap());
        db.follow(a, b).unwrap();
        assert!(!db.is_mutual(a, b).unwrap());
        db.follow(b, a).unwrap();
        assert!(db.is_mutual(a, b).unwrap());
        assert!(db.is_mutual(b, a).unwrap());
    }

    #[test]
    fn follower_lists_are_most_recent_first() {
        let db = testutil::db();
        let target = testutil::user(&db, "star");
        let first = testutil::user(&db, "first");
        let second = testutil::user(&db, "second");

        db.follow(first, target).unwrap();
        // Ensure a later stored timestamp for the second edge.
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.follow(second, target).unwrap();

        let followers = db.list_followers(target).unwrap();
        let ids: Vec<Uuid> = followers.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(followers[0].handle, "second");

        let following = db.list_following(first).unwrap();
        assert_eq!(following.len(), 1);
        assert_eq!(following[0].id, target);
    }
}
