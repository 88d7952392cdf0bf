//! Shared plumbing for the hosted-service adapters.

use std::time::Duration;

use serde_json::Value;

use membench_core::{BenchError, BenchResult, SearchHit};

pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Map a ureq failure onto `BenchError::Http`, keeping the status code so the
/// runner can decide whether to retry.
pub fn map_err(err: ureq::Error) -> BenchError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            BenchError::Http {
                status: Some(code),
                message: truncate(&body, 300),
            }
        }
        ureq::Error::Transport(t) => BenchError::Http {
            status: None,
            message: t.to_string(),
        },
    }
}

pub fn read_json(resp: ureq::Response) -> BenchResult<Value> {
    // DELETE endpoints may answer with an empty body.
    let body = resp
        .into_string()
        .map_err(|e| BenchError::InvalidResponse(e.to_string()))?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Join a base URL and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Result arrays come back bare or wrapped under one of several keys.
pub fn result_items<'a>(resp: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(list) = resp.as_array() {
        return list;
    }
    keys.iter()
        .find_map(|k| resp.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// First string-ish field present among `keys`.
pub fn first_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn hit_from_value(v: &Value) -> SearchHit {
    SearchHit {
        id: first_str(v, &["id", "memory_id", "uuid"]).unwrap_or_default(),
        text: first_str(v, &["text", "memory", "content"]).unwrap_or_default(),
        score: ["score", "similarity"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_f64))
            .map(|s| s as f32),
        created_at: first_str(v, &["created_at"]),
        updated_at: first_str(v, &["updated_at"]),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}
