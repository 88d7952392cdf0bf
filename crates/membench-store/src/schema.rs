use rusqlite::Connection;

use membench_core::BenchError;

pub fn init_db(conn: &Connection) -> Result<(), BenchError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            created_at TEXT NOT NULL,
            text TEXT NOT NULL,
            tags TEXT -- JSON array
        );

        CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(namespace);
        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
        ",
    )
    .map_err(|e| BenchError::Database(e.to_string()))?;

    let fts_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='memories_fts'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| BenchError::Database(e.to_string()))?;

    if !fts_exists {
        conn.execute_batch(
            "
            CREATE VIRTUAL TABLE memories_fts USING fts5(
                id UNINDEXED,
                text,
                content='memories',
                content_rowid='rowid'
            );

            CREATE TRIGGER memories_ai AFTER INSERT ON memories BEGIN
                INSERT INTO memories_fts(rowid, id, text)
                VALUES (new.rowid, new.id, new.text);
            END;

            CREATE TRIGGER memories_ad AFTER DELETE ON memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, id, text)
                VALUES('delete', old.rowid, old.id, old.text);
            END;

            CREATE TRIGGER memories_au AFTER UPDATE ON memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, id, text)
                VALUES('delete', old.rowid, old.id, old.text);
                INSERT INTO memories_fts(rowid, id, text)
                VALUES (new.rowid, new.id, new.text);
            END;
            ",
        )
        .map_err(|e| BenchError::Database(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('memories', 'memories_fts')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
