use chrono::{DateTime, Duration, Utc};
use heron_types::error::{SocialError, SocialResult};
use rusqlite::{Connection, params};
use tracing::error;
use uuid::Uuid;

use crate::conversations::{conversation_exists, is_participant};
use crate::models::{format_ts, now_ts, parse_ts, parse_uuid};
use crate::{Database, StoreExt};
use heron_types::models::Message;

impl Database {
    /// Append one message to the conversation's log and bump its
    /// last-activity timestamp, as one transaction. Creation timestamps
    /// within a conversation are strictly increasing: when the wall clock
    /// ties with or falls behind the newest message, the new timestamp is
    /// bumped one millisecond past it.
    pub fn send_message(
        &self,
        conversation: Uuid,
        sender: Uuid,
        content: &str,
    ) -> SocialResult<(Uuid, DateTime<Utc>)> {
        if content.trim().is_empty() {
            return Err(SocialError::Validation("message content is empty".into()));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().store_err("send_message")?;

            if !conversation_exists(&tx, conversation).store_err("send_message")? {
                return Err(SocialError::NotFound("conversation"));
            }
            if !is_participant(&tx, conversation, sender).store_err("send_message")? {
                return Err(SocialError::Permission(
                    "sender is not a participant of this conversation",
                ));
            }

            let mut created = now_ts();
            let newest: Option<String> = tx
                .query_row(
                    "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                    [conversation.to_string()],
                    |row| row.get(0),
                )
                .store_err("send_message")?;
            if let Some(newest) = newest {
                let newest = parse_ts(&newest);
                if created <= newest {
                    created = newest + Duration::milliseconds(1);
                }
            }

            let id = Uuid::new_v4();
            let created_s = format_ts(created);
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    conversation.to_string(),
                    sender.to_string(),
                    content,
                    created_s
                ],
            )
            .store_err("send_message")?;

            tx.execute(
                "UPDATE conversations SET last_activity_at = ?1 WHERE id = ?2",
                params![created_s, conversation.to_string()],
            )
            .store_err("send_message")?;

            tx.commit().store_err("send_message")?;
            Ok((id, created))
        })
        .inspect_err(|e| {
            if matches!(e, SocialError::Unavailable(_)) {
                error!(%sender, %conversation, "send_message transaction failed");
            }
        })
    }

    /// Newest-first page of a conversation's log; participant-only.
    /// `before` carries the `created_at` of the oldest message from the
    /// previous page to fetch older ones.
    pub fn list_messages(
        &self,
        conversation: Uuid,
        requester: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> SocialResult<Vec<Message>> {
        self.with_conn(|conn| {
            if !conversation_exists(conn, conversation).store_err("list_messages")? {
                return Err(SocialError::NotFound("conversation"));
            }
            if !is_participant(conn, conversation, requester).store_err("list_messages")? {
                return Err(SocialError::Permission(
                    "only participants may read this conversation",
                ));
            }
            query_messages(conn, conversation, limit, before).store_err("list_messages")
        })
    }

    /// Flag everything the reader has received as read. Idempotent; has no
    /// effect on message ordering. Returns how many messages were newly
    /// flagged.
    pub fn mark_read(&self, conversation: Uuid, reader: Uuid) -> SocialResult<usize> {
        self.with_conn(|conn| {
            if !conversation_exists(conn, conversation).store_err("mark_read")? {
                return Err(SocialError::NotFound("conversation"));
            }
            if !is_participant(conn, conversation, reader).store_err("mark_read")? {
                return Err(SocialError::Permission(
                    "only participants may read this conversation",
                ));
            }
            conn.execute(
                "UPDATE messages SET read = 1
                 WHERE conversation_id = ?1 AND sender_id <> ?2 AND read = 0",
                params![conversation.to_string(), reader.to_string()],
            )
            .store_err("mark_read")
        })
    }
}

fn query_messages(
    conn: &Connection,
    conversation: Uuid,
    limit: u32,
    before: Option<DateTime<Utc>>,
) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, content, created_at, read
         FROM messages
         WHERE conversation_id = ?1
           AND (?2 IS NULL OR created_at < ?2)
         ORDER BY created_at DESC, id DESC
         LIMIT ?3",
    )?;

    let before_s = before.map(format_ts);
    let rows = stmt
        .query_map(
            params![conversation.to_string(), before_s, limit],
            |row| {
                let id: String = row.get(0)?;
                let conversation_id: String = row.get(1)?;
                let sender_id: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                Ok(Message {
                    id: parse_uuid(&id),
                    conversation_id: parse_uuid(&conversation_id),
                    sender_id: parse_uuid(&sender_id),
                    content: row.get(3)?,
                    created_at: parse_ts(&created_at),
                    read: row.get(5)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn direct(db: &Database) -> (Uuid, Uuid, Uuid) {
        let a = testutil::user(db, "ana");
        let b = testutil::user(db, "bo");
        testutil::make_mutual(db, a, b);
        let convo = db.open_direct_conversation(a, b).unwrap();
        (convo, a, b)
    }

    #[test]
    fn non_participant_send_is_rejected_and_appends_nothing() {
        let db = testutil::db();
        let (convo, a, _b) = direct(&db);
        let outsider = testutil::user(&db, "lurker");

        let err = db.send_message(convo, outsider, "let me in").unwrap_err();
        assert!(matches!(err, SocialError::Permission(_)));
        assert!(db.list_messages(convo, a, 50, None).unwrap().is_empty());
    }

    #[test]
    fn send_to_unknown_conversation_is_not_found() {
        let db = testutil::db();
        let a = testutil::user(&db, "ana");
        let err = db.send_message(Uuid::new_v4(), a, "hello?").unwrap_err();
        assert!(matches!(err, SocialError::NotFound("conversation")));
    }

    #[test]
    fn empty_content_is_rejected() {
        let db = testutil::db();
        let (convo, a, _b) = direct(&db);
        let err = db.send_message(convo, a, "   ").unwrap_err();
        assert!(matches!(err, SocialError::Validation(_)));
    }

    #[test]
    fn timestamps_strictly_increase_within_a_conversation() {
        let db = testutil::db();
        let (convo, a, b) = direct(&db);

        // Back-to-back sends easily land in the same millisecond; the log
        // must still be strictly ordered.
        let mut stamps = Vec::new();
        for i in 0..20 {
            let sender = if i % 2 == 0 { a } else { b };
            let (_, at) = db.send_message(convo, sender, &format!("m{}", i)).unwrap();
            stamps.push(at);
        }
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));

        let page = db.list_messages(convo, a, 50, None).unwrap();
        assert_eq!(page.len(), 20);
        assert_eq!(page[0].content, "m19");
    }

    #[test]
    fn last_activity_follows_the_newest_message() {
        let db = testutil::db();
        let (convo, a, _b) = direct(&db);

        let (_, at) = db.send_message(convo, a, "ping").unwrap();
        let inbox = db.list_conversations_for_user(a).unwrap();
        assert_eq!(inbox[0].id, convo);
        assert_eq!(inbox[0].last_activity_at, at);
    }

    #[test]
    fn pagination_walks_backwards_through_the_log() {
        let db = testutil::db();
        let (convo, a, _b) = direct(&db);

        for i in 0..5 {
            db.send_message(convo, a, &format!("m{}", i)).unwrap();
        }

        let first_page = db.list_messages(convo, a, 2, None).unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].content, "m4");

        let cursor = first_page.last().unwrap().created_at;
        let second_page = db.list_messages(convo, a, 2, Some(cursor)).unwrap();
        assert_eq!(second_page[0].content, "m2");
        assert!(second_page.iter().all(|m| m.created_at < cursor));
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = testutil::db();
        let (convo, a, b) = direct(&db);

        db.send_message(convo, a, "one").unwrap();
        db.send_message(convo, a, "two").unwrap();

        // The reader's own messages stay untouched.
        assert_eq!(db.mark_read(convo, b).unwrap(), 2);
        assert_eq!(db.mark_read(convo, b).unwrap(), 0);
        assert_eq!(db.mark_read(convo, a).unwrap(), 0);

        let page = db.list_messages(convo, b, 50, None).unwrap();
        assert!(page.iter().all(|m| m.read));
    }
}
