//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$MEMBENCH_CONFIG` environment variable
//! 2. `~/.config/membench/config.toml`
//! 3. Built-in defaults (everything is optional)
//!
//! Credentials never live in the file; they come from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use membench_adapters::{LettaSettings, Mem0Settings};
use membench_core::{QueryMode, SyntheticParams};

use crate::runner::{Backoff, FatSource, HitPolicy, RunSettings};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub run: RunConfig,
    pub retry: RetryConfig,
    pub mem0: Mem0Config,
    pub letta: LettaConfig,
    pub store: StoreConfig,
}

/// Synthetic fact corpus used on misses.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub n_facts: usize,
    pub n_gold: usize,
    pub seed: u64,
    pub gold_entities: usize,
    pub topic_mod: usize,
}

/// Benchmark loop settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: QueryMode,
    /// 1 = single pass, 2 = pass1 (write on miss) + pass2 (search only).
    pub passes: usize,
    pub pages: usize,
    pub page_size: usize,
    /// Facts written per page. Negative means unlimited.
    pub cap_per_page: i64,
    /// Fat results are cut to this many items before writing.
    pub max_fat_return: usize,
    /// Facts written per fat miss.
    pub fat_write: usize,
    pub fat_source: FatSource,
    pub hit_policy: HitPolicy,
    pub search_k: usize,
    /// Pause between pages, in milliseconds.
    pub throttle_ms: u64,
    /// Number of templated queries (`gold.entity.1..=queries`).
    pub queries: usize,
}

/// Write retry with exponential backoff.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Mem0 platform settings. The key comes from `$MEM0_API_KEY`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Mem0Config {
    pub api_base: String,
    /// Overridden by `$MEM0_NAMESPACE`.
    pub namespace: String,
    pub version: String,
    pub timeout_secs: u64,
}

/// Letta settings. Token from `$LETTA_TOKEN` or `$LETTA_API_KEY`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LettaConfig {
    /// Overridden by `$LETTA_API_BASE`.
    pub api_base: String,
    /// Overridden by `$LETTA_PROJECT`.
    pub project: Option<String>,
    /// Overridden by `$LETTA_AGENT_ID`.
    pub agent_id: Option<String>,
    pub page_size: usize,
    pub timeout_secs: u64,
}

/// Local SQLite memory service.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path. Default: platform-specific data dir.
    pub path: Option<String>,
}

// --- Defaults ---

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            n_facts: 10_000,
            n_gold: 500,
            seed: 42,
            gold_entities: 50,
            topic_mod: 10,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: QueryMode::Paged,
            passes: 2,
            pages: 3,
            page_size: 50,
            cap_per_page: 2,
            max_fat_return: 200,
            fat_write: 5,
            fat_source: FatSource::Backend,
            hit_policy: HitPolicy::Strict,
            search_k: 5,
            throttle_ms: 50,
            queries: 50,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 400,
            max_delay_ms: 6_000,
        }
    }
}

impl Default for Mem0Config {
    fn default() -> Self {
        Self {
            api_base: membench_adapters::mem0::DEFAULT_API_BASE.into(),
            namespace: "mem-eval-fixed".into(),
            version: "v2".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for LettaConfig {
    fn default() -> Self {
        Self {
            api_base: membench_adapters::letta::DEFAULT_API_BASE.into(),
            project: None,
            agent_id: None,
            page_size: 50,
            timeout_secs: 30,
        }
    }
}

// --- Conversions ---

impl CorpusConfig {
    pub fn params(&self) -> SyntheticParams {
        SyntheticParams {
            n_facts: self.n_facts,
            n_gold: self.n_gold,
            seed: self.seed,
            gold_entities: self.gold_entities,
            topic_mod: self.topic_mod,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Config {
    pub fn run_settings(&self) -> RunSettings {
        let run = &self.run;
        RunSettings {
            mode: run.mode,
            passes: run.passes,
            pages: run.pages,
            page_size: run.page_size,
            cap_per_page: usize::try_from(run.cap_per_page).ok(),
            max_fat_return: run.max_fat_return,
            fat_write: run.fat_write,
            fat_source: run.fat_source,
            hit_policy: run.hit_policy,
            search_k: run.search_k,
            throttle: Duration::from_millis(run.throttle_ms),
            retry: self.retry.backoff(),
            namespace: None,
            echo: true,
        }
    }

    /// Mem0 settings with environment overrides applied.
    pub fn mem0_settings(&self, namespace: Option<String>) -> Mem0Settings {
        let namespace = namespace
            .or_else(|| env_non_empty("MEM0_NAMESPACE"))
            .unwrap_or_else(|| self.mem0.namespace.clone());
        let mut settings = Mem0Settings::new(
            env_non_empty("MEM0_API_KEY").unwrap_or_default(),
            namespace,
        );
        settings.api_base = self.mem0.api_base.clone();
        settings.version = self.mem0.version.clone();
        settings.timeout = Duration::from_secs(self.mem0.timeout_secs);
        settings
    }

    /// Letta settings with environment overrides applied.
    pub fn letta_settings(&self) -> LettaSettings {
        let token = env_non_empty("LETTA_TOKEN")
            .or_else(|| env_non_empty("LETTA_API_KEY"))
            .unwrap_or_default();
        let agent_id = env_non_empty("LETTA_AGENT_ID")
            .or_else(|| self.letta.agent_id.clone())
            .unwrap_or_default();
        let mut settings = LettaSettings::new(token, agent_id);
        settings.api_base =
            env_non_empty("LETTA_API_BASE").unwrap_or_else(|| self.letta.api_base.clone());
        settings.project = env_non_empty("LETTA_PROJECT").or_else(|| self.letta.project.clone());
        settings.page_size = self.letta.page_size;
        settings.timeout = Duration::from_secs(self.letta.timeout_secs);
        settings
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MEMBENCH_CONFIG") {
        return Some(PathBuf::from(p));
    }

    dirs_home().map(|home| home.join(".config").join("membench").join("config.toml"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Show the active config path (for `membench config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.corpus.n_gold, 500);
        assert_eq!(config.run.mode, QueryMode::Paged);
        assert_eq!(config.run.cap_per_page, 2);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.mem0.namespace, "mem-eval-fixed");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[run]
mode = "fat"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.mode, QueryMode::Fat);
        // Other fields should be defaults
        assert_eq!(config.run.pages, 3);
        assert_eq!(config.corpus.seed, 42);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[corpus]
n_facts = 2000
n_gold = 100
seed = 7
gold_entities = 20
topic_mod = 5

[run]
mode = "paged"
passes = 1
pages = 2
page_size = 10
cap_per_page = -1
max_fat_return = 50
fat_write = 3
fat_source = "canonical"
hit_policy = "any"
search_k = 10
throttle_ms = 0
queries = 20

[retry]
max_retries = 2
base_delay_ms = 100
max_delay_ms = 1000

[mem0]
api_base = "http://localhost:8888"
namespace = "bench"
version = "v2"
timeout_secs = 5

[letta]
api_base = "http://localhost:8283"
project = "default-project"
agent_id = "agent-123"
page_size = 20
timeout_secs = 10

[store]
path = "/tmp/membench.db"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.corpus.params().gold_entities, 20);
        assert_eq!(config.store.path.as_deref(), Some("/tmp/membench.db"));
        assert_eq!(config.letta.agent_id.as_deref(), Some("agent-123"));

        let settings = config.run_settings();
        assert_eq!(settings.passes, 1);
        assert_eq!(settings.cap_per_page, None);
        assert_eq!(settings.fat_source, FatSource::Canonical);
        assert_eq!(settings.hit_policy, HitPolicy::Any);
        assert_eq!(settings.throttle, Duration::ZERO);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_cap_per_page_conversion() {
        let config = Config::default();
        assert_eq!(config.run_settings().cap_per_page, Some(2));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let toml_str = r#"
[run]
mode = "thin"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }
}
