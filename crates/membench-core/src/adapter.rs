use serde::{Deserialize, Serialize};

use crate::error::BenchResult;
use crate::fact::Fact;

/// One search result as returned by a memory service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// A memory service under benchmark.
pub trait MemoryAdapter {
    /// Framework label written to run records, e.g. `"Mem0"`.
    fn framework(&self) -> &str;

    /// Store facts as long-term memories. Returns the ids the service
    /// reported; services that do not echo ids return fewer than written.
    fn write(&self, facts: &[Fact]) -> BenchResult<Vec<String>>;

    fn search(&self, query: &str, k: usize) -> BenchResult<Vec<SearchHit>>;

    /// Returns `false` if the service had nothing to delete.
    fn delete(&self, id: &str) -> BenchResult<bool>;
}
