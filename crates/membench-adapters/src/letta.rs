//! Letta archival memory adapter.
//!
//! Facts are written as archival passages on one agent. Search walks the
//! passage list with cursor pagination (`after` = last id of the previous
//! page) until it reaches the configured page, then returns its first `k`.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use membench_core::{BenchError, BenchResult, Fact, MemoryAdapter, SearchHit};

use crate::http::{self, hit_from_value, join_url, result_items};

const FRAMEWORK: &str = "Letta";
pub const DEFAULT_API_BASE: &str = "https://api.letta.com";

#[derive(Debug, Clone)]
pub struct LettaSettings {
    pub api_base: String,
    pub token: String,
    pub project: Option<String>,
    pub agent_id: String,
    /// 1-indexed page of passages returned by `search`.
    pub page: usize,
    pub page_size: usize,
    pub timeout: Duration,
}

impl LettaSettings {
    pub fn new(token: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            token: token.into(),
            project: None,
            agent_id: agent_id.into(),
            page: 1,
            page_size: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct LettaAdapter {
    agent: ureq::Agent,
    settings: LettaSettings,
}

impl LettaAdapter {
    pub fn new(settings: LettaSettings) -> BenchResult<Self> {
        if settings.token.trim().is_empty() {
            return Err(BenchError::Config(
                "LETTA_TOKEN (or LETTA_API_KEY) is not set".into(),
            ));
        }
        if settings.agent_id.trim().is_empty() {
            return Err(BenchError::Config("LETTA_AGENT_ID is not set".into()));
        }
        Ok(Self {
            agent: http::agent(settings.timeout),
            settings,
        })
    }

    fn passages_url(&self) -> String {
        join_url(
            &self.settings.api_base,
            &format!("/v1/agents/{}/archival-memory", self.settings.agent_id),
        )
    }

    fn request(&self, req: ureq::Request) -> ureq::Request {
        let req = req.set("Authorization", &format!("Bearer {}", self.settings.token));
        match &self.settings.project {
            Some(project) => req.set("X-Project", project),
            None => req,
        }
    }

    fn list_page(&self, query: &str, after: Option<&str>) -> BenchResult<Vec<Value>> {
        let mut req = self
            .request(self.agent.get(&self.passages_url()))
            .query("limit", &self.settings.page_size.to_string())
            .query("ascending", "true");
        if !query.is_empty() {
            req = req.query("search", query);
        }
        if let Some(after) = after {
            req = req.query("after", after);
        }
        let resp = http::read_json(req.call().map_err(http::map_err)?)?;
        Ok(result_items(&resp, &["passages", "items", "results"]).to_vec())
    }
}

/// `"s p o | ts=ts | src=src"`; empty fields are left out.
pub fn fact_text(fact: &Fact) -> String {
    let mut text = format!("{} {} {}", fact.subject, fact.predicate, fact.object);
    if !fact.ts.is_empty() {
        text.push_str(&format!(" | ts={}", fact.ts));
    }
    if !fact.source.is_empty() {
        text.push_str(&format!(" | src={}", fact.source));
    }
    text
}

/// Request body for one passage. `created_at` is the fact timestamp as UTC
/// RFC 3339, omitted when the timestamp does not parse.
pub fn passage_body(fact: &Fact) -> Value {
    let mut body = json!({ "text": fact_text(fact) });
    if !fact.tags.is_empty() {
        body["tags"] = json!(fact.tags);
    }
    if let Some(ts) = fact.timestamp() {
        body["created_at"] = json!(ts.and_utc().to_rfc3339());
    }
    body
}

impl MemoryAdapter for LettaAdapter {
    fn framework(&self) -> &str {
        FRAMEWORK
    }

    fn write(&self, facts: &[Fact]) -> BenchResult<Vec<String>> {
        let mut ids = Vec::new();
        for fact in facts {
            let resp = self
                .request(self.agent.post(&self.passages_url()))
                .send_json(passage_body(fact))
                .map_err(http::map_err)?;
            let resp = http::read_json(resp)?;
            // Creation returns the new passage, or a list holding it.
            match &resp {
                Value::Array(list) => {
                    ids.extend(list.iter().filter_map(|p| http::first_str(p, &["id"])))
                }
                other => ids.extend(http::first_str(other, &["id"])),
            }
        }
        debug!(written = facts.len(), ids = ids.len(), "letta passages created");
        Ok(ids)
    }

    fn search(&self, query: &str, k: usize) -> BenchResult<Vec<SearchHit>> {
        let target = self.settings.page.max(1);
        let mut after: Option<String> = None;
        let mut current = 1;
        let mut last_page = Vec::new();

        while current <= target {
            let items = self.list_page(query, after.as_deref())?;
            after = items.last().and_then(|p| http::first_str(p, &["id"]));
            last_page = items;
            if last_page.is_empty() || after.is_none() {
                break;
            }
            current += 1;
        }

        let hits: Vec<SearchHit> = last_page.iter().take(k).map(hit_from_value).collect();
        debug!(query, page = target, hits = hits.len(), "letta search");
        Ok(hits)
    }

    fn delete(&self, id: &str) -> BenchResult<bool> {
        let url = format!("{}/{id}", self.passages_url());
        match self.request(self.agent.delete(&url)).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(http::map_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact() -> Fact {
        Fact::new(
            "Project Orion",
            "was released in",
            "2024",
            "2024-06-01T00:00:00",
        )
        .with_tags(&["orion", "release"])
        .with_source("demo")
    }

    #[test]
    fn test_fact_text() {
        assert_eq!(
            fact_text(&fact()),
            "Project Orion was released in 2024 | ts=2024-06-01T00:00:00 | src=demo"
        );
        let bare = Fact::new("a", "b", "c", "").with_source("");
        assert_eq!(fact_text(&bare), "a b c");
    }

    #[test]
    fn test_passage_body() {
        let body = passage_body(&fact());
        assert_eq!(body["tags"], json!(["orion", "release"]));
        assert_eq!(body["created_at"], "2024-06-01T00:00:00+00:00");

        let bare = passage_body(&Fact::new("a", "b", "c", "not a date"));
        assert!(bare.get("created_at").is_none());
        assert!(bare.get("tags").is_none());
        assert_eq!(bare["text"], "a b c | ts=not a date | src=synthetic");
    }

    #[test]
    fn test_settings_validation() {
        let err = LettaAdapter::new(LettaSettings::new("", "agent-1"))
            .err()
            .unwrap();
        assert!(matches!(err, BenchError::Config(_)));

        let err = LettaAdapter::new(LettaSettings::new("tok", " ")).err().unwrap();
        assert!(matches!(err, BenchError::Config(_)));

        assert!(LettaAdapter::new(LettaSettings::new("tok", "agent-1")).is_ok());
    }
}
