use chrono::{DateTime, Utc};
use heron_types::error::{SocialError, SocialResult};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::models::{format_ts, now_ts, parse_ts, parse_uuid};
use crate::users::user_exists;
use crate::{Database, OptionalExt, StoreExt};
use heron_types::models::Comment;

impl Database {
    /// Append one comment to a story's discussion. A declared parent must
    /// be an existing comment on the same story; the thread builder later
    /// tolerates parents deleted after the fact.
    pub fn insert_comment(
        &self,
        story: Uuid,
        author: Uuid,
        content: &str,
        parent: Option<Uuid>,
    ) -> SocialResult<(Uuid, DateTime<Utc>)> {
        if content.trim().is_empty() {
            return Err(SocialError::Validation("comment content is empty".into()));
        }

        self.with_conn(|conn| {
            if !user_exists(conn, author).store_err("insert_comment")? {
                return Err(SocialError::NotFound("user"));
            }
            if let Some(parent) = parent {
                let parent_story: Option<String> = conn
                    .query_row(
                        "SELECT story_id FROM comments WHERE id = ?1",
                        [parent.to_string()],
                        |row| row.get(0),
                    )
                    .optional()
                    .store_err("insert_comment")?;
                match parent_story {
                    None => return Err(SocialError::NotFound("parent comment")),
                    Some(s) if parse_uuid(&s) != story => {
                        return Err(SocialError::Validation(
                            "parent comment belongs to a different story".into(),
                        ));
                    }
                    Some(_) => {}
                }
            }

            let id = Uuid::new_v4();
            let created = now_ts();
            conn.execute(
                "INSERT INTO comments (id, story_id, author_id, content, parent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    story.to_string(),
                    author.to_string(),
                    content,
                    parent.map(|p| p.to_string()),
                    format_ts(created)
                ],
            )
            .store_err("insert_comment")?;

            Ok((id, created))
        })
    }

    /// The full flat comment set for one story, in storage order. Callers
    /// run it through the thread builder; this read may be a stale
    /// snapshot without harm.
    pub fn comments_for_story(&self, story: Uuid) -> SocialResult<Vec<Comment>> {
        self.with_conn(|conn| query_story_comments(conn, story).store_err("comments_for_story"))
    }
}

fn query_story_comments(conn: &Connection, story: Uuid) -> rusqlite::Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, story_id, author_id, content, parent_id, created_at
         FROM comments WHERE story_id = ?1",
    )?;
    let rows = stmt
        .query_map([story.to_string()], |row| {
            let id: String = row.get(0)?;
            let story_id: String = row.get(1)?;
            let author_id: String = row.get(2)?;
            let parent_id: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok(Comment {
                id: parse_uuid(&id),
                story_id: parse_uuid(&story_id),
                author_id: parse_uuid(&author_id),
                content: row.get(3)?,
                parent_id: parent_id.map(|p| parse_uuid(&p)),
                created_at: parse_ts(&created_at),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn replies_must_target_a_comment_on_the_same_story() {
        let db = testutil::db();
        let author = testutil::user(&db, "ana");
        let story_a = Uuid::new_v4();
        let story_b = Uuid::new_v4();

        let (root, _) = db.insert_comment(story_a, author, "root", None).unwrap();

        let err = db
            .insert_comment(story_b, author, "cross-story", Some(root))
            .unwrap_err();
        assert!(matches!(err, SocialError::Validation(_)));

        let err = db
            .insert_comment(story_a, author, "ghost parent", Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, SocialError::NotFound("parent comment")));

        db.insert_comment(story_a, author, "reply", Some(root)).unwrap();
        assert_eq!(db.comments_for_story(story_a).unwrap().len(), 2);
    }

    #[test]
    fn story_without_comments_is_empty_not_an_error() {
        let db = testutil::db();
        assert!(db.comments_for_story(Uuid::new_v4()).unwrap().is_empty());
    }
}
