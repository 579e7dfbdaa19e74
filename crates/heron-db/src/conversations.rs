use std::collections::HashMap;

use heron_types::api::ConversationSummary;
use heron_types::error::{SocialError, SocialResult};
use heron_types::models::Conversation;
use rusqlite::{Connection, params};
use tracing::error;
use uuid::Uuid;

use crate::follows::is_mutual;
use crate::models::{format_ts, now_ts, parse_ts, parse_uuid};
use crate::users::user_exists;
use crate::{Database, OptionalExt, StoreExt, is_unique_violation};

/// Canonical key for the unordered participant pair of a direct
/// conversation. The UNIQUE index over this column is what guarantees at
/// most one direct conversation per pair, whichever side creates it.
pub(crate) fn pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

impl Database {
    /// Open (or re-open) the direct conversation between requester and
    /// target. Gated on mutual follow; idempotent under concurrent calls
    /// from either direction — a caller that loses the creation race gets
    /// the winner's id, never an error.
    pub fn open_direct_conversation(
        &self,
        requester: Uuid,
        target: Uuid,
    ) -> SocialResult<Uuid> {
        if requester == target {
            return Err(SocialError::SelfAction);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().store_err("open_direct_conversation")?;

            if !user_exists(&tx, target).store_err("open_direct_conversation")? {
                return Err(SocialError::NotFound("user"));
            }
            if !is_mutual(&tx, requester, target).store_err("open_direct_conversation")? {
                return Err(SocialError::Permission(
                    "direct messages require a mutual follow",
                ));
            }

            let key = pair_key(requester, target);
            if let Some(existing) =
                find_by_pair_key(&tx, &key).store_err("open_direct_conversation")?
            {
                return Ok(existing);
            }

            let id = Uuid::new_v4();
            let now = format_ts(now_ts());
            let created = tx.execute(
                "INSERT INTO conversations
                     (id, is_group, creator_id, pair_key, created_at, last_activity_at)
                 VALUES (?1, 0, ?2, ?3, ?4, ?4)",
                params![id.to_string(), requester.to_string(), key, now],
            );
            match created {
                Ok(_) => {
                    for member in [requester, target] {
                        tx.execute(
                            "INSERT INTO conversation_participants
                                 (conversation_id, user_id, joined_at)
                             VALUES (?1, ?2, ?3)",
                            params![id.to_string(), member.to_string(), now],
                        )
                        .store_err("open_direct_conversation")?;
                    }
                    tx.commit().store_err("open_direct_conversation")?;
                    Ok(id)
                }
                // Lost the creation race to the opposite direction: the
                // pair row exists now, so fall back to the lookup.
                Err(e) if is_unique_violation(&e) => {
                    find_by_pair_key(&tx, &key)
                        .store_err("open_direct_conversation")?
                        .ok_or_else(|| {
                            SocialError::unavailable_msg(
                                "pair conversation missing after unique violation",
                            )
                        })
                }
                Err(e) => Err(e).store_err("open_direct_conversation"),
            }
        })
        .inspect_err(|e| {
            if matches!(e, SocialError::Unavailable(_)) {
                error!(%requester, %target, "open_direct_conversation failed");
            }
        })
    }

    /// Administrative messaging path: no mutual-follow gate, arbitrary
    /// participant list. The creator is always a participant.
    pub fn create_group_conversation(
        &self,
        creator: Uuid,
        participants: &[Uuid],
    ) -> SocialResult<Uuid> {
        let mut members = vec![creator];
        for &p in participants {
            if !members.contains(&p) {
                members.push(p);
            }
        }
        if members.len() < 2 {
            return Err(SocialError::Validation(
                "a group conversation needs at least two members".into(),
            ));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().store_err("create_group_conversation")?;

            for &member in &members {
                if !user_exists(&tx, member).store_err("create_group_conversation")? {
                    return Err(SocialError::NotFound("user"));
                }
            }

            let id = Uuid::new_v4();
            let now = format_ts(now_ts());
            tx.execute(
                "INSERT INTO conversations
                     (id, is_group, creator_id, pair_key, created_at, last_activity_at)
                 VALUES (?1, 1, ?2, NULL, ?3, ?3)",
                params![id.to_string(), creator.to_string(), now],
            )
            .store_err("create_group_conversation")?;

            for member in &members {
                tx.execute(
                    "INSERT INTO conversation_participants
                         (conversation_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![id.to_string(), member.to_string(), now],
                )
                .store_err("create_group_conversation")?;
            }

            tx.commit().store_err("create_group_conversation")?;
            Ok(id)
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> SocialResult<Conversation> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, is_group, creator_id, created_at, last_activity_at
                     FROM conversations WHERE id = ?1",
                    [id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .store_err("get_conversation")?;

            let (id, is_group, creator_id, created_at, last_activity_at) =
                row.ok_or(SocialError::NotFound("conversation"))?;
            Ok(Conversation {
                id: parse_uuid(&id),
                is_group,
                creator_id: parse_uuid(&creator_id),
                created_at: parse_ts(&created_at),
                last_activity_at: parse_ts(&last_activity_at),
            })
        })
    }

    pub fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> SocialResult<Option<Uuid>> {
        self.with_conn(|conn| {
            find_by_pair_key(conn, &pair_key(a, b)).store_err("find_direct_conversation")
        })
    }

    pub fn list_participants(&self, conversation: Uuid) -> SocialResult<Vec<Uuid>> {
        self.with_conn(|conn| {
            if !conversation_exists(conn, conversation).store_err("list_participants")? {
                return Err(SocialError::NotFound("conversation"));
            }
            participant_ids(conn, conversation).store_err("list_participants")
        })
    }

    /// Inbox view: every conversation the user belongs to, most recently
    /// active first.
    pub fn list_conversations_for_user(
        &self,
        user: Uuid,
    ) -> SocialResult<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.is_group, c.last_activity_at
                     FROM conversations c
                     JOIN conversation_participants p ON p.conversation_id = c.id
                     WHERE p.user_id = ?1
                     ORDER BY c.last_activity_at DESC, c.id DESC",
                )
                .store_err("list_conversations_for_user")?;

            let rows: Vec<(String, bool, String)> = stmt
                .query_map([user.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .store_err("list_conversations_for_user")?
                .collect::<Result<Vec<_>, _>>()
                .store_err("list_conversations_for_user")?;

            let ids: Vec<String> = rows.iter().map(|(id, _, _)| id.clone()).collect();
            let mut members = batch_participants(conn, &ids)
                .store_err("list_conversations_for_user")?;

            Ok(rows
                .into_iter()
                .map(|(id, is_group, last_activity_at)| ConversationSummary {
                    id: parse_uuid(&id),
                    is_group,
                    participant_ids: members.remove(&id).unwrap_or_default(),
                    last_activity_at: parse_ts(&last_activity_at),
                })
                .collect())
        })
    }
}

pub(crate) fn conversation_exists(conn: &Connection, id: Uuid) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        [id.to_string()],
        |row| row.get(0),
    )
}

pub(crate) fn is_participant(
    conn: &Connection,
    conversation: Uuid,
    user: Uuid,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversation_participants
          WHERE conversation_id = ?1 AND user_id = ?2)",
        params![conversation.to_string(), user.to_string()],
        |row| row.get(0),
    )
}

fn find_by_pair_key(conn: &Connection, key: &str) -> rusqlite::Result<Option<Uuid>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE pair_key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|opt| opt.map(|id| parse_uuid(&id)))
}

fn participant_ids(conn: &Connection, conversation: Uuid) -> rusqlite::Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1 ORDER BY joined_at, user_id",
    )?;
    let rows = stmt
        .query_map([conversation.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.iter().map(|s| parse_uuid(s)).collect())
}

/// Batch-fetch participants for a set of conversations in one query.
fn batch_participants(
    conn: &Connection,
    conversation_ids: &[String],
) -> rusqlite::Result<HashMap<String, Vec<Uuid>>> {
    if conversation_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> =
        (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT conversation_id, user_id FROM conversation_participants
         WHERE conversation_id IN ({})
         ORDER BY joined_at, user_id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut map: HashMap<String, Vec<Uuid>> = HashMap::new();
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (cid, uid) in rows {
        map.entry(cid).or_default().push(parse_uuid(&uid));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use std::sync::Arc;

    #[test]
    fn open_requires_mutual_follow() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");

        let err = db.open_direct_conversation(a, b).unwrap_err();
        assert!(matches!(err, SocialError::Permission(_)));

        // One direction is not enough.
        db.follow(a, b).unwrap();
        let err = db.open_direct_conversation(a, b).unwrap_err();
        assert!(matches!(err, SocialError::Permission(_)));

        db.follow(b, a).unwrap();
        db.open_direct_conversation(a, b).unwrap();
    }

    #[test]
    fn open_is_idempotent_in_both_directions() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");
        testutil::make_mutual(&db, a, b);

        let first = db.open_direct_conversation(a, b).unwrap();
        let again = db.open_direct_conversation(a, b).unwrap();
        let reversed = db.open_direct_conversation(b, a).unwrap();
        assert_eq!(first, again);
        assert_eq!(first, reversed);

        assert_eq!(db.find_direct_conversation(b, a).unwrap(), Some(first));

        let mut participants = db.list_participants(first).unwrap();
        participants.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(participants, expected);
    }

    #[test]
    fn open_with_self_or_unknown_target_fails() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");

        assert!(matches!(
            db.open_direct_conversation(a, a),
            Err(SocialError::SelfAction)
        ));
        assert!(matches!(
            db.open_direct_conversation(a, Uuid::new_v4()),
            Err(SocialError::NotFound("user"))
        ));
    }

    #[test]
    fn concurrent_opens_converge_on_one_conversation() {
        let db = Arc::new(testutil::db());
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");
        testutil::make_mutual(&db, a, b);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db_ab = Arc::clone(&db);
            handles.push(std::thread::spawn(move || {
                db_ab.open_direct_conversation(a, b).unwrap()
            }));
            let db_ba = Arc::clone(&db);
            handles.push(std::thread::spawn(move || {
                db_ba.open_direct_conversation(b, a).unwrap()
            }));
        }

        let ids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn get_conversation_returns_the_record_or_not_found() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");
        testutil::make_mutual(&db, a, b);

        let id = db.open_direct_conversation(a, b).unwrap();
        let convo = db.get_conversation(id).unwrap();
        assert_eq!(convo.id, id);
        assert!(!convo.is_group);
        assert_eq!(convo.creator_id, a);
        assert_eq!(convo.last_activity_at, convo.created_at);

        std::thread::sleep(std::time::Duration::from_millis(5));
        db.send_message(id, a, "hi").unwrap();
        let convo = db.get_conversation(id).unwrap();
        assert!(convo.last_activity_at > convo.created_at);

        let err = db.get_conversation(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SocialError::NotFound("conversation")));
    }

    #[test]
    fn group_conversations_skip_the_gate() {
        let db = testutil::db();
        let admin = testutil::user(&db, "admin");
        let x = testutil::user(&db, "x");
        let y = testutil::user(&db, "y");

        // No follow edges anywhere.
        let id = db.create_group_conversation(admin, &[x, y]).unwrap();
        let participants = db.list_participants(id).unwrap();
        assert_eq!(participants.len(), 3);
        assert!(participants.contains(&admin));
    }

    #[test]
    fn group_conversation_needs_two_members() {
        let db = testutil::db();
        let admin = testutil::user(&db, "admin");
        let err = db.create_group_conversation(admin, &[admin]).unwrap_err();
        assert!(matches!(err, SocialError::Validation(_)));
    }

    #[test]
    fn inbox_orders_by_last_activity() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let b = testutil::user(&db, "bo");
        let c = testutil::user(&db, "cy");
        testutil::make_mutual(&db, a, b);
        testutil::make_mutual(&db, a, c);

        let with_b = db.open_direct_conversation(a, b).unwrap();
        let with_c = db.open_direct_conversation(a, c).unwrap();

        // A message in the older conversation moves it to the top.
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.send_message(with_b, a, "hey").unwrap();

        let inbox = db.list_conversations_for_user(a).unwrap();
        let ids: Vec<Uuid> = inbox.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![with_b, with_c]);
        assert_eq!(inbox[0].participant_ids.len(), 2);
    }
}
