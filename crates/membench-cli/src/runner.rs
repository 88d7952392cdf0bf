//! Benchmark loop: search memory, fall back to the fact tool on a miss, write
//! what the tool returned, and log one JSON record per query.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use membench_core::{BenchResult, Fact, MegaFactsBackend, MemoryAdapter, QueryMode, SearchHit};

/// How a search result is judged a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HitPolicy {
    /// Any returned item counts.
    Any,
    /// Some item must mention both the query's subject and object.
    #[default]
    Strict,
}

/// What a fat-mode miss writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FatSource {
    /// Top results of a fat backend query.
    #[default]
    Backend,
    /// A single fact restating the query.
    Canonical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based): doubles, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: QueryMode,
    pub passes: usize,
    pub pages: usize,
    pub page_size: usize,
    /// `None` writes whole pages.
    pub cap_per_page: Option<usize>,
    pub max_fat_return: usize,
    pub fat_write: usize,
    pub fat_source: FatSource,
    pub hit_policy: HitPolicy,
    pub search_k: usize,
    pub throttle: Duration,
    pub retry: Backoff,
    /// Recorded on every line when set.
    pub namespace: Option<String>,
    /// Print each record to stdout as it is logged.
    pub echo: bool,
}

/// One JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub framework: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub query: String,
    pub used_memory: bool,
    #[serde(
        default,
        alias = "items_used",
        skip_serializing_if = "Option::is_none"
    )]
    pub items_written: Option<usize>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub phase: Option<String>,
    pub queries: usize,
    pub hits: usize,
    pub items_written: usize,
}

/// Subject and object of the query both appear in the hit text, ignoring case.
pub fn is_true_hit(query: &str, text: &str) -> bool {
    let parts: Vec<&str> = query.split_whitespace().collect();
    if parts.len() < 3 {
        return false;
    }
    let subject = parts[0].to_lowercase();
    let object = parts[parts.len() - 1].to_lowercase();
    let text = text.to_lowercase();
    text.contains(&subject) && text.contains(&object)
}

pub fn is_hit(policy: HitPolicy, query: &str, hits: &[SearchHit]) -> bool {
    match policy {
        HitPolicy::Any => !hits.is_empty(),
        HitPolicy::Strict => hits.iter().any(|h| is_true_hit(query, &h.text)),
    }
}

pub struct Runner<'a> {
    adapter: &'a dyn MemoryAdapter,
    backend: &'a mut MegaFactsBackend,
    settings: RunSettings,
}

impl<'a> Runner<'a> {
    pub fn new(
        adapter: &'a dyn MemoryAdapter,
        backend: &'a mut MegaFactsBackend,
        settings: RunSettings,
    ) -> Self {
        Self {
            adapter,
            backend,
            settings,
        }
    }

    /// Run every pass over `queries`, appending records to `out`.
    pub fn run<W: Write>(&mut self, queries: &[String], out: &mut W) -> Result<Vec<PassSummary>> {
        info!(
            framework = self.adapter.framework(),
            mode = %self.settings.mode,
            passes = self.settings.passes,
            queries = queries.len(),
            "starting benchmark run"
        );

        let mut summaries = Vec::new();
        if self.settings.passes >= 2 {
            summaries.push(self.run_pass(queries, Some("pass1"), true, out)?);
            summaries.push(self.run_pass(queries, Some("pass2"), false, out)?);
        } else {
            summaries.push(self.run_pass(queries, None, true, out)?);
        }
        out.flush()?;

        for s in &summaries {
            info!(
                phase = s.phase.as_deref().unwrap_or("single"),
                hits = s.hits,
                queries = s.queries,
                written = s.items_written,
                "pass finished"
            );
        }
        Ok(summaries)
    }

    fn run_pass<W: Write>(
        &mut self,
        queries: &[String],
        phase: Option<&str>,
        write_on_miss: bool,
        out: &mut W,
    ) -> Result<PassSummary> {
        let mut summary = PassSummary {
            phase: phase.map(str::to_string),
            ..Default::default()
        };

        for q in queries {
            let t0 = Instant::now();
            let hits = self.adapter.search(q, self.settings.search_k)?;
            let used_memory = is_hit(self.settings.hit_policy, q, &hits);

            let items_written = if write_on_miss {
                Some(if used_memory { 0 } else { self.fill_from_tool(q) })
            } else {
                None
            };
            let latency_ms = t0.elapsed().as_millis() as u64;

            summary.queries += 1;
            summary.hits += usize::from(used_memory);
            summary.items_written += items_written.unwrap_or(0);

            let record = RunRecord {
                framework: self.adapter.framework().to_string(),
                phase: summary.phase.clone(),
                mode: Some(self.settings.mode.to_string()),
                query: q.clone(),
                used_memory,
                items_written,
                latency_ms,
                namespace: self.settings.namespace.clone(),
            };
            let line = serde_json::to_string(&record)?;
            writeln!(out, "{line}")?;
            if self.settings.echo {
                println!("{line}");
            }
        }

        Ok(summary)
    }

    /// Query the fact tool for `q` and write the allowed share of its results.
    /// Returns the number of facts actually stored.
    fn fill_from_tool(&mut self, q: &str) -> usize {
        match self.settings.mode {
            QueryMode::Fat => {
                let facts = match self.settings.fat_source {
                    // Bare `"<query>."`: no timestamp, source or tags.
                    FatSource::Canonical => Fact::from_query(q, "")
                        .map(|f| vec![f.with_source("")])
                        .unwrap_or_default(),
                    FatSource::Backend => {
                        let mut items = self.backend.query_fat(q).items;
                        items.truncate(self.settings.max_fat_return.min(self.settings.fat_write));
                        items
                    }
                };
                self.write_each(&facts)
            }
            QueryMode::Paged => {
                let mut written = 0;
                for page in 1..=self.settings.pages {
                    let mut items = self
                        .backend
                        .query_page(q, page, self.settings.page_size)
                        .items;
                    if let Some(cap) = self.settings.cap_per_page {
                        items.truncate(cap);
                    }
                    written += self.write_each(&items);
                    if page < self.settings.pages && !self.settings.throttle.is_zero() {
                        thread::sleep(self.settings.throttle);
                    }
                }
                written
            }
        }
    }

    fn write_each(&self, facts: &[Fact]) -> usize {
        facts
            .iter()
            .filter(|f| self.write_with_retry(f).is_ok())
            .count()
    }

    /// Write one fact, backing off on retryable errors. Final failures are
    /// logged and swallowed so one bad write does not stop the run.
    fn write_with_retry(&self, fact: &Fact) -> BenchResult<()> {
        let backoff = self.settings.retry;
        let mut attempt = 0;
        loop {
            match self.adapter.write(std::slice::from_ref(fact)) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < backoff.max_retries => {
                    let delay = backoff.delay(attempt);
                    debug!(attempt, ?delay, "retrying write: {e}");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "write failed (attempt {}/{}): {e}",
                        attempt + 1,
                        backoff.max_retries + 1
                    );
                    return Err(e);
                }
            }
        }
    }
}
