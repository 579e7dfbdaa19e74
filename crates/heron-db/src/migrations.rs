use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                TEXT PRIMARY KEY,
            handle            TEXT NOT NULL UNIQUE,
            display_name      TEXT NOT NULL,
            avatar_ref        TEXT,
            password          TEXT NOT NULL,
            followers_count   INTEGER NOT NULL DEFAULT 0,
            following_count   INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL
        );

        -- Directed follow edges. The counters on users are caches of this
        -- table and are only ever touched in the same transaction as an
        -- edge insert or delete.
        CREATE TABLE IF NOT EXISTS follows (
            follower_id     TEXT NOT NULL REFERENCES users(id),
            following_id    TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL,
            PRIMARY KEY (follower_id, following_id),
            CHECK (follower_id <> following_id)
        );

        CREATE INDEX IF NOT EXISTS idx_follows_following
            ON follows(following_id, created_at);

        -- pair_key is the sorted 'min:max' of the two participant ids for
        -- direct conversations, NULL for group ones. Its UNIQUE index is
        -- what makes concurrent A->B / B->A opens converge on one row.
        CREATE TABLE IF NOT EXISTS conversations (
            id                TEXT PRIMARY KEY,
            is_group          INTEGER NOT NULL DEFAULT 0,
            creator_id        TEXT NOT NULL REFERENCES users(id),
            pair_key          TEXT UNIQUE,
            created_at        TEXT NOT NULL,
            last_activity_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id   TEXT NOT NULL REFERENCES conversations(id),
            user_id           TEXT NOT NULL REFERENCES users(id),
            joined_at         TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            read             INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS comments (
            id          TEXT PRIMARY KEY,
            story_id    TEXT NOT NULL,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            parent_id   TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_story
            ON comments(story_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
