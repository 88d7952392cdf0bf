mod analyze;
mod config;
mod runner;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use membench_adapters::{LettaAdapter, Mem0Adapter};
use membench_core::{benchmark_queries, Fact, MegaFactsBackend, MemoryAdapter, QueryMode};
use membench_store::SqliteAdapter;

use crate::config::Config;
use crate::runner::{FatSource, HitPolicy, Runner};

#[derive(Parser)]
#[command(
    name = "membench",
    version,
    about = "Recall benchmark for agent memory services (Letta, Mem0, local)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recall benchmark against a memory service
    Run {
        /// Memory service under test
        #[arg(short, long, default_value = "local")]
        framework: Framework,

        /// Fact tool mode used on a miss
        #[arg(short, long)]
        mode: Option<CliMode>,

        /// 1 = single pass, 2 = write pass then search-only pass
        #[arg(long)]
        passes: Option<usize>,

        /// Pages fetched per miss (paged mode)
        #[arg(long)]
        pages: Option<usize>,

        #[arg(long)]
        page_size: Option<usize>,

        /// Facts written per page; negative means unlimited
        #[arg(long, allow_negative_numbers = true)]
        cap_per_page: Option<i64>,

        /// What a fat-mode miss writes
        #[arg(long)]
        fat_source: Option<FatSource>,

        #[arg(long)]
        hit_policy: Option<HitPolicy>,

        /// Number of templated queries
        #[arg(short, long)]
        queries: Option<usize>,

        #[arg(long)]
        n_facts: Option<usize>,

        #[arg(long)]
        n_gold: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Namespace (Mem0 user_id, local store namespace)
        #[arg(long)]
        namespace: Option<String>,

        /// JSONL output path (default: outputs/logs_<framework>.jsonl)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// SQLite database for the local service
        #[arg(long)]
        db: Option<PathBuf>,

        /// Delete the namespace's local memories before running
        #[arg(long)]
        reset: bool,
    },

    /// Hit rate and average latency per mode from one or more run logs
    Analyze {
        /// JSONL log files
        #[arg(required = true)]
        logs: Vec<PathBuf>,
    },

    /// Two-pass report: per-phase stats, hit transitions, latency deltas
    AnalyzePhases {
        /// JSONL log file from a two-pass run
        #[arg(short, long)]
        log: PathBuf,

        /// Slowest/fastest pass2 rows to list
        #[arg(short, long, default_value = "5")]
        top_k: usize,
    },

    /// Query the synthetic fact tool and print results as JSON lines
    Query {
        /// Query text, e.g. "gold.entity.7 is associated with gold.topic.7"
        query: String,

        #[arg(short, long, default_value = "fat")]
        mode: CliMode,

        /// 1-indexed page (paged mode)
        #[arg(short, long, default_value = "1")]
        page: usize,

        #[arg(long, default_value = "50")]
        page_size: usize,

        /// Maximum items printed
        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        n_facts: Option<usize>,

        #[arg(long)]
        n_gold: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write one fact, search for it, delete the top hit
    Smoke {
        #[arg(short, long, default_value = "local")]
        framework: Framework,

        #[arg(long)]
        namespace: Option<String>,

        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show the active config file path
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Framework {
    /// Local SQLite store
    Local,
    /// Mem0 hosted platform
    Mem0,
    /// Letta archival memory
    Letta,
}

impl Framework {
    fn slug(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Mem0 => "mem0",
            Self::Letta => "letta",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    /// Whole ranked list
    Fat,
    /// One page at a time
    Paged,
}

impl From<CliMode> for QueryMode {
    fn from(val: CliMode) -> Self {
        match val {
            CliMode::Fat => QueryMode::Fat,
            CliMode::Paged => QueryMode::Paged,
        }
    }
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "membench", "membench")
        .map(|dirs| dirs.data_dir().join("memories.db"))
        .unwrap_or_else(|| PathBuf::from("memories.db"))
}

/// Open the adapter for `framework`. Also returns the namespace to stamp on
/// run records, if the service has one.
fn open_adapter(
    framework: Framework,
    config: &Config,
    namespace: Option<String>,
    db: Option<PathBuf>,
    reset: bool,
) -> Result<(Box<dyn MemoryAdapter>, Option<String>)> {
    match framework {
        Framework::Local => {
            let path = db
                .or_else(|| config.store.path.as_ref().map(PathBuf::from))
                .unwrap_or_else(default_db_path);
            let ns = namespace.unwrap_or_else(|| config.mem0.namespace.clone());
            let store = SqliteAdapter::open(&path)
                .context("failed to open database")?
                .with_namespace(ns.clone());
            if reset {
                let removed = store.clear()?;
                tracing::info!(namespace = %ns, removed, "cleared local memories");
            }
            Ok((Box::new(store), Some(ns)))
        }
        Framework::Mem0 => {
            let adapter = Mem0Adapter::new(config.mem0_settings(namespace))?;
            let ns = adapter.namespace().to_string();
            Ok((Box::new(adapter), Some(ns)))
        }
        Framework::Letta => {
            let adapter = LettaAdapter::new(config.letta_settings())?;
            Ok((Box::new(adapter), None))
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            framework,
            mode,
            passes,
            pages,
            page_size,
            cap_per_page,
            fat_source,
            hit_policy,
            queries,
            n_facts,
            n_gold,
            seed,
            namespace,
            out,
            db,
            reset,
        } => {
            let mut config = config::load_config()?;
            let run = &mut config.run;
            if let Some(m) = mode {
                run.mode = m.into();
            }
            if let Some(v) = passes {
                run.passes = v;
            }
            if let Some(v) = pages {
                run.pages = v;
            }
            if let Some(v) = page_size {
                run.page_size = v;
            }
            if let Some(v) = cap_per_page {
                run.cap_per_page = v;
            }
            if let Some(v) = fat_source {
                run.fat_source = v;
            }
            if let Some(v) = hit_policy {
                run.hit_policy = v;
            }
            if let Some(v) = queries {
                run.queries = v;
            }
            apply_corpus_overrides(&mut config, n_facts, n_gold, seed);
            cmd_run(&config, framework, namespace, out, db, reset)
        }
        Commands::Analyze { logs } => cmd_analyze(&logs),
        Commands::AnalyzePhases { log, top_k } => cmd_analyze_phases(&log, top_k),
        Commands::Query {
            query,
            mode,
            page,
            page_size,
            limit,
            n_facts,
            n_gold,
            seed,
        } => {
            let mut config = config::load_config()?;
            apply_corpus_overrides(&mut config, n_facts, n_gold, seed);
            cmd_query(&config, &query, mode.into(), page, page_size, limit)
        }
        Commands::Smoke {
            framework,
            namespace,
            db,
        } => {
            let config = config::load_config()?;
            cmd_smoke(&config, framework, namespace, db)
        }
        Commands::Config => {
            println!("{}", config::show_config_path());
            Ok(())
        }
    }
}

fn apply_corpus_overrides(
    config: &mut Config,
    n_facts: Option<usize>,
    n_gold: Option<usize>,
    seed: Option<u64>,
) {
    if let Some(v) = n_facts {
        config.corpus.n_facts = v;
    }
    if let Some(v) = n_gold {
        config.corpus.n_gold = v;
    }
    if let Some(v) = seed {
        config.corpus.seed = v;
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_run(
    config: &Config,
    framework: Framework,
    namespace: Option<String>,
    out: Option<PathBuf>,
    db: Option<PathBuf>,
    reset: bool,
) -> Result<()> {
    let (adapter, ns) = open_adapter(framework, config, namespace, db, reset)?;
    let mut backend = MegaFactsBackend::from_synthetic(config.corpus.params());
    let queries = benchmark_queries(config.run.queries, config.corpus.topic_mod);

    let out_path =
        out.unwrap_or_else(|| PathBuf::from(format!("outputs/logs_{}.jsonl", framework.slug())));
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file =
        File::create(&out_path).with_context(|| format!("creating {}", out_path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut settings = config.run_settings();
    settings.namespace = ns;
    println!(
        "framework={} mode={} passes={} namespace={}",
        adapter.framework(),
        settings.mode,
        settings.passes,
        settings.namespace.as_deref().unwrap_or("-")
    );

    let summaries = Runner::new(adapter.as_ref(), &mut backend, settings)
        .run(&queries, &mut writer)?;

    println!("{}", "─".repeat(58));
    for s in &summaries {
        println!(
            "{:<8} {:>4}/{:<4} hits  {:>6} facts written",
            s.phase.as_deref().unwrap_or("run"),
            s.hits,
            s.queries,
            s.items_written
        );
    }
    println!("{}", "─".repeat(58));
    println!("Log: {}", out_path.display());
    Ok(())
}

fn cmd_analyze(logs: &[PathBuf]) -> Result<()> {
    let records = analyze::load_jsonl(logs);
    if records.is_empty() {
        println!("No records loaded. Check the log paths.");
        return Ok(());
    }
    let (per_mode, overall) = analyze::analyze_modes(&records);
    print!("{}", analyze::render_mode_report(&per_mode, &overall));
    Ok(())
}

fn cmd_analyze_phases(log: &Path, top_k: usize) -> Result<()> {
    let records = analyze::load_jsonl(&[log]);
    if records.is_empty() {
        println!("No records loaded from {}.", log.display());
        return Ok(());
    }
    let report = analyze::analyze_phases(&records, top_k);
    print!("{}", analyze::render_phase_report(&report, top_k));
    Ok(())
}

fn cmd_query(
    config: &Config,
    query: &str,
    mode: QueryMode,
    page: usize,
    page_size: usize,
    limit: usize,
) -> Result<()> {
    let mut backend = MegaFactsBackend::from_synthetic(config.corpus.params());
    let result = backend.query(query, mode, page, page_size);
    eprintln!(
        "{} items returned (corpus: {} facts, {} gold)",
        result.items.len(),
        backend.len(),
        backend.gold().len()
    );
    for fact in result.items.iter().take(limit) {
        println!("{}", serde_json::to_string(fact)?);
    }
    Ok(())
}

fn cmd_smoke(
    config: &Config,
    framework: Framework,
    namespace: Option<String>,
    db: Option<PathBuf>,
) -> Result<()> {
    let (adapter, _) = open_adapter(framework, config, namespace, db, false)?;

    let fact = Fact::new("Project Orion", "was released in", "2024", "2024-06-01T00:00:00")
        .with_tags(&["orion", "release"])
        .with_source("demo");
    let ids = adapter.write(std::slice::from_ref(&fact))?;
    println!("Wrote 1 fact ({} id(s) returned): {fact}", ids.len());

    let hits = adapter.search("Project Orion", 3)?;
    println!("Search hits: {}", serde_json::to_string_pretty(&hits)?);

    match hits.first().filter(|h| !h.id.is_empty()) {
        Some(top) => {
            let deleted = adapter.delete(&top.id)?;
            println!("Deleted {}: {deleted}", top.id);
        }
        None => println!("Skipping delete: no hit with an id."),
    }
    Ok(())
}
