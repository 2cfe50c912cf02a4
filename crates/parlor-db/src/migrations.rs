use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (chat schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'MEMBER',
                created_at  TEXT NOT NULL
            );

            -- source_id has blocked destination_id
            CREATE TABLE blocks (
                source_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                destination_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (source_id, destination_id)
            );

            CREATE INDEX idx_blocks_destination ON blocks(destination_id);

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                name        TEXT,
                kind        TEXT NOT NULL,
                state       TEXT NOT NULL DEFAULT 'ACTIVE',
                is_visible  INTEGER NOT NULL DEFAULT 1,
                creator_id  TEXT REFERENCES users(id) ON DELETE SET NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                deleted_at  TEXT
            );

            CREATE INDEX idx_channels_updated ON channels(updated_at, id);

            CREATE TABLE participants (
                id          TEXT PRIMARY KEY,
                channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                pinned      INTEGER NOT NULL DEFAULT 0,
                joined_at   TEXT NOT NULL,
                left_at     TEXT
            );

            -- At most one active membership per (channel, user)
            CREATE UNIQUE INDEX idx_participants_active
                ON participants(channel_id, user_id) WHERE left_at IS NULL;

            CREATE INDEX idx_participants_user ON participants(user_id, left_at);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                author_id   TEXT REFERENCES users(id) ON DELETE SET NULL,
                kind        TEXT NOT NULL,
                text        TEXT,
                payload     TEXT,
                created_at  TEXT NOT NULL,
                deleted_at  TEXT,
                CHECK ((kind = 'TEXT') = (text IS NOT NULL))
            );

            CREATE INDEX idx_messages_channel ON messages(channel_id, created_at, id);

            CREATE TABLE message_reads (
                message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                read_at     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
