use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;

use membench_core::{BenchError, BenchResult, Fact, MemoryAdapter, SearchHit};

use crate::schema::init_db;

const FRAMEWORK: &str = "Local";
const DEFAULT_NAMESPACE: &str = "default";

/// Local memory service: SQLite rows with an FTS5 mirror, ranked by bm25.
pub struct SqliteAdapter {
    conn: Connection,
    namespace: String,
}

impl SqliteAdapter {
    pub fn open(path: &Path) -> BenchResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BenchError::Database(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| BenchError::Database(format!("cannot open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| BenchError::Database(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.into(),
        })
    }

    pub fn in_memory() -> BenchResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BenchError::Database(format!("cannot open in-memory db: {e}")))?;
        init_db(&conn)?;
        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.into(),
        })
    }

    /// Scope writes and searches to `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn count(&self) -> BenchResult<usize> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE namespace = ?1",
                params![self.namespace],
                |row| row.get(0),
            )
            .map_err(|e| BenchError::Database(e.to_string()))?;
        Ok(n as usize)
    }

    /// Drop every memory in the current namespace. Returns rows removed.
    pub fn clear(&self) -> BenchResult<usize> {
        self.conn
            .execute(
                "DELETE FROM memories WHERE namespace = ?1",
                params![self.namespace],
            )
            .map_err(|e| BenchError::Database(e.to_string()))
    }
}

/// Turn a free-text query into an FTS5 expression: every token that carries
/// at least one alphanumeric character becomes a quoted phrase, all ANDed.
/// Returns `None` when nothing searchable remains.
pub fn fts_query(query: &str) -> Option<String> {
    let phrases: Vec<String> = query
        .split_whitespace()
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join(" AND "))
    }
}

impl MemoryAdapter for SqliteAdapter {
    fn framework(&self) -> &str {
        FRAMEWORK
    }

    fn write(&self, facts: &[Fact]) -> BenchResult<Vec<String>> {
        let mut ids = Vec::with_capacity(facts.len());
        for fact in facts {
            let id = ulid::Ulid::new().to_string();
            let tags_json = serde_json::to_string(&fact.tags)?;
            self.conn
                .execute(
                    "INSERT INTO memories (id, namespace, created_at, text, tags)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        self.namespace,
                        Utc::now().to_rfc3339(),
                        fact.sentence(),
                        tags_json,
                    ],
                )
                .map_err(|e| BenchError::Database(e.to_string()))?;
            ids.push(id);
        }
        debug!(count = ids.len(), namespace = %self.namespace, "stored memories");
        Ok(ids)
    }

    fn search(&self, query: &str, k: usize) -> BenchResult<Vec<SearchHit>> {
        let Some(expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.text, m.created_at, bm25(memories_fts) AS rank
                 FROM memories_fts
                 JOIN memories m ON m.rowid = memories_fts.rowid
                 WHERE memories_fts MATCH ?1 AND m.namespace = ?2
                 ORDER BY rank
                 LIMIT ?3",
            )
            .map_err(|e| BenchError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![expr, self.namespace, k as i64], |row| {
                let rank: f64 = row.get(3)?;
                Ok(SearchHit {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    score: Some(-rank as f32),
                    created_at: row.get(2)?,
                    updated_at: None,
                })
            })
            .map_err(|e| BenchError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| BenchError::Database(e.to_string()))?);
        }
        Ok(results)
    }

    fn delete(&self, id: &str) -> BenchResult<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM memories WHERE id = ?1 AND namespace = ?2",
                params![id, self.namespace],
            )
            .map_err(|e| BenchError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membench_core::{query_for, GOLD_PREDICATE};

    fn test_store() -> SqliteAdapter {
        SqliteAdapter::in_memory().unwrap()
    }

    fn gold(i: usize) -> Fact {
        Fact::new(
            format!("gold.entity.{i}"),
            GOLD_PREDICATE,
            format!("gold.topic.{}", i % 10),
            "2024-06-01T00:00:00",
        )
        .with_tags(&["gold"])
    }

    #[test]
    fn test_write_and_search() {
        let store = test_store();
        let ids = store.write(&[gold(7), gold(17)]).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.count().unwrap(), 2);

        let hits = store.search(&query_for(7, 10), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[0]);
        assert_eq!(hits[0].text, "gold.entity.7 is associated with gold.topic.7.");
        assert!(hits[0].score.is_some());
        assert!(hits[0].created_at.is_some());
    }

    #[test]
    fn test_search_miss_and_empty_query() {
        let store = test_store();
        store.write(&[gold(3)]).unwrap();
        assert!(store.search(&query_for(4, 10), 5).unwrap().is_empty());
        assert!(store.search("", 5).unwrap().is_empty());
        assert!(store.search("... --", 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_limit() {
        let store = test_store();
        let facts: Vec<Fact> = (0..5).map(|_| gold(2)).collect();
        store.write(&facts).unwrap();
        assert_eq!(store.search(&query_for(2, 10), 3).unwrap().len(), 3);
    }

    #[test]
    fn test_delete() {
        let store = test_store();
        let ids = store.write(&[gold(1)]).unwrap();
        assert!(store.delete(&ids[0]).unwrap());
        assert!(!store.delete(&ids[0]).unwrap());
        assert!(store.search(&query_for(1, 10), 5).unwrap().is_empty());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bench.db");

        let a = SqliteAdapter::open(&path).unwrap().with_namespace("a");
        a.write(&[gold(5)]).unwrap();

        let b = SqliteAdapter::open(&path).unwrap().with_namespace("b");
        assert!(b.search(&query_for(5, 10), 5).unwrap().is_empty());
        assert_eq!(b.count().unwrap(), 0);
        assert_eq!(a.search(&query_for(5, 10), 5).unwrap().len(), 1);

        assert_eq!(a.clear().unwrap(), 1);
        assert_eq!(a.count().unwrap(), 0);
    }

    #[test]
    fn test_fts_query() {
        assert_eq!(
            fts_query("gold.entity.1 is gold.topic.1.").as_deref(),
            Some("\"gold.entity.1\" AND \"is\" AND \"gold.topic.1\"")
        );
        assert_eq!(fts_query("say \"hi\"").as_deref(), Some("\"say\" AND \"\"\"hi\"\"\""));
        assert!(fts_query("  - ").is_none());
    }

    #[test]
    fn test_framework_label() {
        assert_eq!(test_store().framework(), "Local");
    }
}
