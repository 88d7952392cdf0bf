//! Mem0 hosted platform adapter.
//!
//! Every fact becomes one user message added under the namespace (`user_id`).
//! Search is scoped to the same namespace through a filter.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use membench_core::{BenchError, BenchResult, Fact, MemoryAdapter, SearchHit};

use crate::http::{self, first_str, hit_from_value, join_url, result_items};

const FRAMEWORK: &str = "Mem0";
pub const DEFAULT_API_BASE: &str = "https://api.mem0.ai";

#[derive(Debug, Clone)]
pub struct Mem0Settings {
    pub api_base: String,
    pub api_key: String,
    pub namespace: String,
    pub version: String,
    pub timeout: Duration,
}

impl Mem0Settings {
    pub fn new(api_key: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            api_key: api_key.into(),
            namespace: namespace.into(),
            version: "v2".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct Mem0Adapter {
    agent: ureq::Agent,
    settings: Mem0Settings,
}

impl Mem0Adapter {
    pub fn new(settings: Mem0Settings) -> BenchResult<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(BenchError::Config("MEM0_API_KEY is not set".into()));
        }
        Ok(Self {
            agent: http::agent(settings.timeout),
            settings,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.settings.api_base, path)
    }

    fn auth(&self) -> String {
        format!("Token {}", self.settings.api_key)
    }

    fn add_text(&self, text: &str) -> BenchResult<Vec<String>> {
        let body = json!({
            "messages": [{"role": "user", "content": text}],
            "user_id": self.settings.namespace,
            "version": self.settings.version,
        });
        let resp = self
            .agent
            .post(&self.url("/v1/memories/"))
            .set("Authorization", &self.auth())
            .send_json(body)
            .map_err(http::map_err)?;
        Ok(memory_ids(&http::read_json(resp)?))
    }
}

/// `"s p o. (source:src, tags:a,b, ts:ts)"`; empty metadata is left out.
pub fn fact_text(fact: &Fact) -> String {
    let mut meta = Vec::new();
    if !fact.source.is_empty() {
        meta.push(format!("source:{}", fact.source));
    }
    if !fact.tags.is_empty() {
        meta.push(format!("tags:{}", fact.tags.join(",")));
    }
    if !fact.ts.is_empty() {
        meta.push(format!("ts:{}", fact.ts));
    }
    if meta.is_empty() {
        fact.sentence()
    } else {
        format!("{} ({})", fact.sentence(), meta.join(", "))
    }
}

/// Ids of memories created by an add call. The platform answers with a list
/// of events, an object wrapping one (`results` or `memories`), or a single
/// memory object.
pub fn memory_ids(resp: &Value) -> Vec<String> {
    const ID_KEYS: &[&str] = &["id", "memory_id", "uuid"];

    let items = result_items(resp, &["results", "memories"]);
    if !items.is_empty() {
        return items.iter().filter_map(|m| first_str(m, ID_KEYS)).collect();
    }
    first_str(resp, ID_KEYS).into_iter().collect()
}

/// Delete responses carry `deleted`/`success` flags, or nothing at all.
fn delete_succeeded(resp: &Value) -> bool {
    match resp {
        Value::Object(map) if map.contains_key("deleted") || map.contains_key("success") => {
            ["deleted", "success"]
                .iter()
                .any(|k| map.get(*k).and_then(Value::as_bool).unwrap_or(false))
        }
        _ => true,
    }
}

impl MemoryAdapter for Mem0Adapter {
    fn framework(&self) -> &str {
        FRAMEWORK
    }

    fn write(&self, facts: &[Fact]) -> BenchResult<Vec<String>> {
        let mut ids = Vec::new();
        for fact in facts {
            ids.extend(self.add_text(&fact_text(fact))?);
        }
        debug!(written = facts.len(), ids = ids.len(), "mem0 add");
        Ok(ids)
    }

    fn search(&self, query: &str, k: usize) -> BenchResult<Vec<SearchHit>> {
        let body = json!({
            "query": query,
            "filters": {"AND": [{"user_id": self.settings.namespace}]},
            "version": self.settings.version,
        });
        let resp = self
            .agent
            .post(&self.url("/v2/memories/search/"))
            .set("Authorization", &self.auth())
            .send_json(body)
            .map_err(http::map_err)?;
        let resp = http::read_json(resp)?;

        let hits: Vec<SearchHit> = result_items(&resp, &["results", "items", "memories"])
            .iter()
            .take(k)
            .map(hit_from_value)
            .collect();
        debug!(query, hits = hits.len(), "mem0 search");
        Ok(hits)
    }

    fn delete(&self, id: &str) -> BenchResult<bool> {
        let result = self
            .agent
            .delete(&self.url(&format!("/v1/memories/{id}/")))
            .set("Authorization", &self.auth())
            .call();
        match result {
            Ok(resp) => Ok(delete_succeeded(&http::read_json(resp)?)),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(http::map_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_text_with_metadata() {
        let fact = Fact::new(
            "gold.entity.1",
            "is associated with",
            "gold.topic.1",
            "2024-06-01T00:00:00",
        )
        .with_tags(&["gold", "extra"]);
        assert_eq!(
            fact_text(&fact),
            "gold.entity.1 is associated with gold.topic.1. \
             (source:synthetic, tags:gold,extra, ts:2024-06-01T00:00:00)"
        );
    }

    #[test]
    fn test_fact_text_without_metadata() {
        let fact = Fact::new("a", "uses", "b", "").with_source("");
        assert_eq!(fact_text(&fact), "a uses b.");
    }

    #[test]
    fn test_memory_ids_shapes() {
        assert_eq!(
            memory_ids(&json!({"results": [{"id": "a", "event": "ADD"}]})),
            vec!["a"]
        );
        assert_eq!(
            memory_ids(&json!({"memories": [{"id": "a"}, {"id": "b"}]})),
            vec!["a", "b"]
        );
        assert!(memory_ids(&json!({"results": []})).is_empty());
        assert_eq!(memory_ids(&json!({"memory_id": "x"})), vec!["x"]);
        assert_eq!(
            memory_ids(&json!([{"id": "e1", "event": "ADD"}, {"id": "e2"}])),
            vec!["e1", "e2"]
        );
        assert!(memory_ids(&json!({"status": "PENDING"})).is_empty());
        assert!(memory_ids(&Value::Null).is_empty());
    }

    #[test]
    fn test_delete_succeeded() {
        assert!(delete_succeeded(&json!({"deleted": true})));
        assert!(delete_succeeded(&json!({"success": true})));
        assert!(!delete_succeeded(&json!({"deleted": false})));
        assert!(delete_succeeded(&json!({"message": "Memory deleted"})));
        assert!(delete_succeeded(&Value::Null));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = Mem0Adapter::new(Mem0Settings::new("", "ns")).err().unwrap();
        assert!(matches!(err, BenchError::Config(_)));
    }
}
