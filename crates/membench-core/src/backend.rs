//! Query side of the synthetic fact tool.
//!
//! Queries follow a fixed template, `"gold.entity.<i> is associated with
//! gold.topic.<j>"`. The first and last whitespace-separated tokens are taken
//! as the expected subject and object; there is no grammar beyond that.
//!
//! Each call reshuffles the non-matching facts with the backend's own RNG, so
//! results are reproducible for a whole run from a given seed, but two calls
//! on the same instance do not return the same noise order.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corpus::{self, gold_entity, gold_topic, SyntheticParams};
use crate::fact::{Fact, GOLD_PREDICATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Whole ranked list, untruncated.
    #[default]
    Fat,
    /// One fixed-size slice of the ranked list.
    Paged,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fat => write!(f, "fat"),
            Self::Paged => write!(f, "paged"),
        }
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fat" => Ok(Self::Fat),
            "paged" => Ok(Self::Paged),
            _ => Err(format!("invalid query mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub items: Vec<Fact>,
}

/// Render the benchmark query for entity index `i`.
pub fn query_for(i: usize, topic_mod: usize) -> String {
    format!(
        "{} {GOLD_PREDICATE} {}",
        gold_entity(i),
        gold_topic(i, topic_mod)
    )
}

/// The fixed benchmark query list for indices `1..=count`.
pub fn benchmark_queries(count: usize, topic_mod: usize) -> Vec<String> {
    (1..=count).map(|i| query_for(i, topic_mod)).collect()
}

pub struct MegaFactsBackend {
    facts: Vec<Fact>,
    gold: Vec<Fact>,
    rng: ChaCha8Rng,
}

impl MegaFactsBackend {
    pub fn new(facts: Vec<Fact>, gold: Vec<Fact>, rng: ChaCha8Rng) -> Self {
        Self { facts, gold, rng }
    }

    pub fn from_synthetic(params: SyntheticParams) -> Self {
        let corpus::SyntheticCorpus { facts, gold, rng } = corpus::generate(&params);
        Self::new(facts, gold, rng)
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn gold(&self) -> &[Fact] {
        &self.gold
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Gold facts first (gold-list order), then every other fact in a fresh
    /// random order. `Paged` returns the 1-indexed `page` of that sequence;
    /// page 0 is treated as page 1 and out-of-range pages are empty.
    pub fn query(
        &mut self,
        q: &str,
        mode: QueryMode,
        page: usize,
        page_size: usize,
    ) -> QueryResult {
        let mut tokens = q.split_whitespace();
        let entity = tokens.next();
        let topic = tokens.next_back().or(entity);

        let gold_hits: Vec<Fact> = match (entity, topic) {
            (Some(entity), Some(topic)) => self
                .gold
                .iter()
                .filter(|g| {
                    g.subject == entity && g.predicate == GOLD_PREDICATE && g.object == topic
                })
                .cloned()
                .collect(),
            _ => Vec::new(),
        };

        let mut noise: Vec<Fact> = self
            .facts
            .iter()
            .filter(|f| !gold_hits.contains(f))
            .cloned()
            .collect();
        noise.shuffle(&mut self.rng);

        debug!(
            query = q,
            %mode,
            gold_hits = gold_hits.len(),
            noise = noise.len(),
            "fact backend query"
        );

        let mut items = gold_hits;
        items.append(&mut noise);

        if mode == QueryMode::Paged {
            let start = page.saturating_sub(1).saturating_mul(page_size);
            let end = start.saturating_add(page_size).min(items.len());
            items = if start < end {
                items.drain(start..end).collect()
            } else {
                Vec::new()
            };
        }

        QueryResult { items }
    }

    pub fn query_fat(&mut self, q: &str) -> QueryResult {
        self.query(q, QueryMode::Fat, 1, 0)
    }

    pub fn query_page(&mut self, q: &str, page: usize, page_size: usize) -> QueryResult {
        self.query(q, QueryMode::Paged, page, page_size)
    }
}
