//! Run-log statistics: hit rates and latency figures from JSONL records.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// A logged query, as read back. Every field is optional so logs from older
/// runners still load. Values of an unexpected JSON type are read as absent
/// rather than rejecting the line: only a literal `true` is a hit.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    pub framework: Option<String>,
    pub phase: Option<String>,
    pub mode: Option<String>,
    pub query: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub used_memory: Option<bool>,
    #[serde(alias = "items_used", deserialize_with = "lenient_f64")]
    pub items_written: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub latency_ms: Option<f64>,
    pub namespace: Option<String>,
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(Value::deserialize(d)?.as_bool())
}

/// Numbers, or strings holding a number.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

impl LogRecord {
    fn hit(&self) -> bool {
        self.used_memory == Some(true)
    }

    fn latency(&self) -> f64 {
        self.latency_ms.unwrap_or(0.0)
    }
}

/// Read JSONL files. Blank lines are skipped; unreadable files and
/// unparsable lines are reported and skipped.
pub fn load_jsonl<P: AsRef<Path>>(paths: &[P]) -> Vec<LogRecord> {
    let mut records = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("cannot open {}: {e}", path.display());
                continue;
            }
        };
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("read error in {}: {e}", path.display());
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!("skipping {}:{}: {e}", path.display(), lineno + 1),
            }
        }
    }
    records
}

// ---------------------------------------------------------------------------
// Per-mode statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ModeStats {
    pub total: usize,
    pub hits: usize,
    /// `None` when there are no records.
    pub hit_rate: Option<f64>,
    pub avg_latency_hit_ms: f64,
    pub avg_latency_miss_ms: f64,
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

pub fn mode_stats(records: &[&LogRecord]) -> ModeStats {
    let total = records.len();
    let (hits, misses): (Vec<&LogRecord>, Vec<&LogRecord>) =
        records.iter().copied().partition(|r| r.hit());
    let lat = |rs: &[&LogRecord]| mean(&rs.iter().map(|r| r.latency()).collect::<Vec<_>>());

    ModeStats {
        total,
        hits: hits.len(),
        hit_rate: (total > 0).then(|| hits.len() as f64 / total as f64),
        avg_latency_hit_ms: lat(&hits[..]).unwrap_or(0.0),
        avg_latency_miss_ms: lat(&misses[..]).unwrap_or(0.0),
    }
}

/// Stats per `mode` (first-seen order, missing mode = `"unknown"`), plus
/// overall stats across every record.
pub fn analyze_modes(records: &[LogRecord]) -> (Vec<(String, ModeStats)>, ModeStats) {
    let mut buckets: Vec<(String, Vec<&LogRecord>)> = Vec::new();
    for r in records {
        let mode = r.mode.as_deref().unwrap_or("unknown");
        match buckets.iter_mut().find(|(m, _)| m.as_str() == mode) {
            Some((_, rs)) => rs.push(r),
            None => buckets.push((mode.to_string(), vec![r])),
        }
    }

    let per_mode = buckets
        .into_iter()
        .map(|(mode, rs)| (mode, mode_stats(&rs)))
        .collect();
    let all: Vec<&LogRecord> = records.iter().collect();
    (per_mode, mode_stats(&all))
}

pub fn fmt_pct(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.2}%", r * 100.0),
        None => "NA".into(),
    }
}

pub fn render_mode_report(per_mode: &[(String, ModeStats)], overall: &ModeStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Per-mode statistics ===");
    for (mode, s) in per_mode {
        let _ = writeln!(out, "- mode: {mode}");
        let _ = writeln!(out, "  total: {}", s.total);
        let _ = writeln!(out, "  hits: {}  hit rate: {}", s.hits, fmt_pct(s.hit_rate));
        let _ = writeln!(out, "  avg latency (hit): {:.2} ms", s.avg_latency_hit_ms);
        let _ = writeln!(out, "  avg latency (miss): {:.2} ms", s.avg_latency_miss_ms);
    }
    let _ = writeln!(out, "\n=== Overall (all logs and modes) ===");
    let _ = writeln!(out, "total: {}", overall.total);
    let _ = writeln!(
        out,
        "hits: {}  hit rate: {}",
        overall.hits,
        fmt_pct(overall.hit_rate)
    );
    let _ = writeln!(out, "avg latency (hit): {:.2} ms", overall.avg_latency_hit_ms);
    let _ = writeln!(out, "avg latency (miss): {:.2} ms", overall.avg_latency_miss_ms);
    out
}

// ---------------------------------------------------------------------------
// Two-pass (phase) statistics
// ---------------------------------------------------------------------------

pub fn median(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    Some(if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    })
}

/// 95th percentile: the 19th of 20 quantile cut points (exclusive method,
/// linear interpolation) when there are at least 20 samples, else the max.
pub fn p95(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut data = xs.to_vec();
    data.sort_by(f64::total_cmp);
    let len = data.len();
    if len < 20 {
        return data.last().copied();
    }

    const N: usize = 20;
    const I: usize = 19;
    let m = len + 1;
    let j = (I * m / N).clamp(1, len - 1);
    let delta = (I * m - j * N) as f64;
    Some((data[j - 1] * (N as f64 - delta) + data[j] * delta) / N as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStats {
    pub count: usize,
    pub hit_rate: f64,
    pub avg_latency: Option<f64>,
    pub p50_latency: Option<f64>,
    pub p95_latency: Option<f64>,
}

pub fn phase_stats(records: &[LogRecord], phase: &str) -> PhaseStats {
    let xs: Vec<&LogRecord> = records
        .iter()
        .filter(|r| r.phase.as_deref() == Some(phase))
        .collect();
    let n = xs.len();
    let lat: Vec<f64> = xs.iter().map(|r| r.latency()).collect();
    let hits = xs.iter().filter(|r| r.hit()).count();
    PhaseStats {
        count: n,
        hit_rate: if n == 0 { 0.0 } else { hits as f64 / n as f64 },
        avg_latency: mean(&lat),
        p50_latency: median(&lat),
        p95_latency: p95(&lat),
    }
}

/// Hit/miss outcome of pass1 versus pass2, counted per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transitions {
    pub miss_to_hit: usize,
    pub miss_to_miss: usize,
    pub hit_to_hit: usize,
    pub hit_to_miss: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub framework: String,
    pub namespace: String,
    pub total_rows: usize,
    pub pass1: PhaseStats,
    pub pass2: PhaseStats,
    pub transitions: Transitions,
    /// `pass2 - pass1` latency per paired query.
    pub deltas: Vec<f64>,
    pub slowest: Vec<LogRecord>,
    pub fastest: Vec<LogRecord>,
}

/// Pair pass1 and pass2 records by query. The last record of a phase wins.
fn query_pairs(records: &[LogRecord]) -> Vec<(&LogRecord, &LogRecord)> {
    let mut per_query: BTreeMap<&str, (Option<&LogRecord>, Option<&LogRecord>)> = BTreeMap::new();
    for r in records {
        let entry = per_query
            .entry(r.query.as_deref().unwrap_or(""))
            .or_default();
        match r.phase.as_deref() {
            Some("pass1") => entry.0 = Some(r),
            Some("pass2") => entry.1 = Some(r),
            _ => {}
        }
    }
    per_query
        .into_values()
        .filter_map(|(p1, p2)| Some((p1?, p2?)))
        .collect()
}

pub fn analyze_phases(records: &[LogRecord], top_k: usize) -> PhaseReport {
    let first = records.first();
    let mut transitions = Transitions::default();
    let mut deltas = Vec::new();
    for (p1, p2) in query_pairs(records) {
        deltas.push(p2.latency() - p1.latency());
        match (p1.hit(), p2.hit()) {
            (false, true) => transitions.miss_to_hit += 1,
            (false, false) => transitions.miss_to_miss += 1,
            (true, true) => transitions.hit_to_hit += 1,
            (true, false) => transitions.hit_to_miss += 1,
        }
    }

    let mut pass2: Vec<LogRecord> = records
        .iter()
        .filter(|r| r.phase.as_deref() == Some("pass2"))
        .cloned()
        .collect();
    pass2.sort_by(|a, b| b.latency().total_cmp(&a.latency()));
    let slowest = pass2.iter().take(top_k).cloned().collect();
    let fastest = pass2.iter().rev().take(top_k).cloned().collect();

    PhaseReport {
        framework: first
            .and_then(|r| r.framework.clone())
            .unwrap_or_else(|| "(unknown)".into()),
        namespace: first
            .and_then(|r| r.namespace.clone())
            .unwrap_or_else(|| "(unknown)".into()),
        total_rows: records.len(),
        pass1: phase_stats(records, "pass1"),
        pass2: phase_stats(records, "pass2"),
        transitions,
        deltas,
        slowest,
        fastest,
    }
}

fn section(out: &mut String, title: &str) {
    let bar = "=".repeat(title.chars().count());
    let _ = writeln!(out, "\n{bar}\n{title}\n{bar}");
}

fn record_line(r: &LogRecord) -> String {
    let latency = r
        .latency_ms
        .map(|l| format!("{l}"))
        .unwrap_or_else(|| "?".into());
    format!(
        "{latency} ms  | hit={} | {}",
        r.hit(),
        r.query.as_deref().unwrap_or("")
    )
}

pub fn render_phase_report(report: &PhaseReport, top_k: usize) -> String {
    let mut out = String::new();
    section(&mut out, "Two-pass log analysis (strict hit/miss)");
    let _ = writeln!(out, "framework: {}", report.framework);
    let _ = writeln!(out, "namespace: {}", report.namespace);
    let _ = writeln!(out, "rows: {}", report.total_rows);

    section(&mut out, "Per-phase statistics");
    for (name, s) in [
        ("pass1 (first lookup)", &report.pass1),
        ("pass2 (repeat lookup)", &report.pass2),
    ] {
        let _ = writeln!(out, "- {name}");
        let _ = writeln!(out, "  samples      : {}", s.count);
        let _ = writeln!(out, "  hit rate     : {:.2}%", s.hit_rate * 100.0);
        if let (Some(avg), Some(p50), Some(p95)) = (s.avg_latency, s.p50_latency, s.p95_latency) {
            let _ = writeln!(out, "  avg latency  : {avg:.2} ms");
            let _ = writeln!(out, "  p50 latency  : {p50:.2} ms");
            let _ = writeln!(out, "  p95 latency  : {p95:.2} ms");
        }
    }

    let t = &report.transitions;
    section(&mut out, "Hit transitions (per query)");
    let _ = writeln!(out, "miss -> hit : {}", t.miss_to_hit);
    let _ = writeln!(out, "miss -> miss: {}", t.miss_to_miss);
    let _ = writeln!(out, "hit  -> hit : {}", t.hit_to_hit);
    let _ = writeln!(out, "hit  -> miss: {}", t.hit_to_miss);

    if let (Some(avg), Some(p50)) = (mean(&report.deltas), median(&report.deltas)) {
        section(&mut out, "Latency delta (pass2 - pass1)");
        let _ = writeln!(out, "mean: {avg:.2} ms (negative = second lookup faster)");
        let _ = writeln!(out, "p50 : {p50:.2} ms");
    }

    section(&mut out, &format!("Top{top_k} slowest (pass2)"));
    for r in &report.slowest {
        let _ = writeln!(out, "{}", record_line(r));
    }
    section(&mut out, &format!("Top{top_k} fastest (pass2)"));
    for r in &report.fastest {
        let _ = writeln!(out, "{}", record_line(r));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rec(mode: Option<&str>, phase: Option<&str>, q: &str, hit: bool, latency: f64) -> LogRecord {
        LogRecord {
            framework: Some("Mem0".into()),
            phase: phase.map(String::from),
            mode: mode.map(String::from),
            query: Some(q.into()),
            used_memory: Some(hit),
            items_written: None,
            latency_ms: Some(latency),
            namespace: Some("ns".into()),
        }
    }

    #[test]
    fn test_analyze_modes() {
        let records = vec![
            rec(Some("fat"), None, "a", true, 10.0),
            rec(Some("fat"), None, "b", false, 30.0),
            rec(Some("paged"), None, "c", false, 50.0),
            rec(None, None, "d", true, 20.0),
        ];
        let (per_mode, overall) = analyze_modes(&records);

        let names: Vec<&str> = per_mode.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(names, ["fat", "paged", "unknown"]);

        let fat = &per_mode[0].1;
        assert_eq!(fat.total, 2);
        assert_eq!(fat.hits, 1);
        assert_eq!(fat.hit_rate, Some(0.5));
        assert_eq!(fat.avg_latency_hit_ms, 10.0);
        assert_eq!(fat.avg_latency_miss_ms, 30.0);

        let paged = &per_mode[1].1;
        assert_eq!(paged.avg_latency_hit_ms, 0.0);

        assert_eq!(overall.total, 4);
        assert_eq!(overall.hits, 2);
        assert_eq!(overall.avg_latency_hit_ms, 15.0);
        assert_eq!(overall.avg_latency_miss_ms, 40.0);
    }

    #[test]
    fn test_missing_used_memory_counts_as_miss() {
        let mut r = rec(Some("fat"), None, "a", true, 5.0);
        r.used_memory = None;
        let (_, overall) = analyze_modes(&[r]);
        assert_eq!(overall.hits, 0);
        assert_eq!(overall.avg_latency_miss_ms, 5.0);
    }

    #[test]
    fn test_empty_records() {
        let (per_mode, overall) = analyze_modes(&[]);
        assert!(per_mode.is_empty());
        assert_eq!(overall.hit_rate, None);
        assert_eq!(fmt_pct(overall.hit_rate), "NA");
        assert_eq!(fmt_pct(Some(0.25)), "25.00%");
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_p95_small_sample_is_max() {
        assert_eq!(p95(&[]), None);
        assert_eq!(p95(&[5.0, 9.0, 1.0]), Some(9.0));
    }

    #[test]
    fn test_p95_exclusive_quantile() {
        // 1..=20: m = 21, j = 19, delta = 19, so 19*1/20 + 20*19/20 = 19.95
        let xs: Vec<f64> = (1..=20).map(f64::from).collect();
        let v = p95(&xs).unwrap();
        assert!((v - 19.95).abs() < 1e-9, "{v}");

        // 1..=100: m = 101, j = 95, delta = 19 -> 95 + 0.95 = 95.95
        let xs: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let v = p95(&xs).unwrap();
        assert!((v - 95.95).abs() < 1e-9, "{v}");
    }

    #[test]
    fn test_analyze_phases() {
        let records = vec![
            rec(None, Some("pass1"), "q1", false, 100.0),
            rec(None, Some("pass1"), "q2", false, 80.0),
            rec(None, Some("pass1"), "q3", true, 20.0),
            rec(None, Some("pass2"), "q1", true, 30.0),
            rec(None, Some("pass2"), "q2", false, 60.0),
            rec(None, Some("pass2"), "q3", true, 10.0),
            rec(None, Some("pass2"), "orphan", true, 5.0),
        ];
        let report = analyze_phases(&records, 2);

        assert_eq!(report.framework, "Mem0");
        assert_eq!(report.namespace, "ns");
        assert_eq!(report.total_rows, 7);
        assert_eq!(report.pass1.count, 3);
        assert!((report.pass1.hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.pass2.count, 4);
        assert_eq!(report.pass2.hit_rate, 0.75);
        assert_eq!(report.pass2.p95_latency, Some(60.0));

        assert_eq!(
            report.transitions,
            Transitions {
                miss_to_hit: 1,
                miss_to_miss: 1,
                hit_to_hit: 1,
                hit_to_miss: 0,
            }
        );
        let mut deltas = report.deltas.clone();
        deltas.sort_by(f64::total_cmp);
        assert_eq!(deltas, vec![-70.0, -20.0, -10.0]);

        let slow: Vec<_> = report.slowest.iter().map(|r| r.query.clone().unwrap()).collect();
        assert_eq!(slow, ["q2", "q1"]);
        let fast: Vec<_> = report.fastest.iter().map(|r| r.query.clone().unwrap()).collect();
        assert_eq!(fast, ["orphan", "q3"]);

        let text = render_phase_report(&report, 2);
        assert!(text.contains("miss -> hit : 1"));
        assert!(text.contains("Top2 slowest (pass2)"));
    }

    #[test]
    fn test_empty_phase() {
        let s = phase_stats(&[], "pass1");
        assert_eq!(s.count, 0);
        assert_eq!(s.hit_rate, 0.0);
        assert!(s.avg_latency.is_none());
    }

    #[test]
    fn test_load_jsonl_skips_bad_lines_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(
            f,
            r#"{{"framework":"Letta","query":"q","mode":"fat","used_memory":true,"items_used":5,"latency_ms":12}}"#
        )
        .unwrap();
        writeln!(f).unwrap();
        writeln!(f, "not json").unwrap();
        writeln!(
            f,
            r#"{{"framework":"Mem0","phase":"pass2","query":"q","used_memory":false,"latency_ms":7,"namespace":"ns"}}"#
        )
        .unwrap();
        drop(f);

        let missing = dir.path().join("missing.jsonl");
        let records = load_jsonl(&[path, missing]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].items_written, Some(5.0));
        assert_eq!(records[0].mode.as_deref(), Some("fat"));
        assert_eq!(records[1].phase.as_deref(), Some("pass2"));
        assert_eq!(records[1].latency_ms, Some(7.0));
    }

    #[test]
    fn test_mistyped_fields_do_not_drop_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typed.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(
            f,
            r#"{{"mode":"fat","query":"a","used_memory":1,"latency_ms":"40"}}"#
        )
        .unwrap();
        writeln!(
            f,
            r#"{{"mode":"fat","query":"b","used_memory":true,"latency_ms":[],"items_used":null}}"#
        )
        .unwrap();
        drop(f);

        let records = load_jsonl(&[path]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].used_memory, None);
        assert_eq!(records[0].latency_ms, Some(40.0));
        assert_eq!(records[1].latency_ms, None);
        assert_eq!(records[1].items_written, None);

        let (_, overall) = analyze_modes(&records);
        assert_eq!(overall.total, 2);
        assert_eq!(overall.hits, 1);
        assert_eq!(overall.avg_latency_miss_ms, 40.0);
        assert_eq!(overall.avg_latency_hit_ms, 0.0);
    }

    #[test]
    fn test_render_mode_report() {
        let records = vec![rec(Some("paged"), None, "a", true, 12.0)];
        let (per_mode, overall) = analyze_modes(&records);
        let text = render_mode_report(&per_mode, &overall);
        assert!(text.contains("- mode: paged"));
        assert!(text.contains("hit rate: 100.00%"));
        assert!(text.contains("avg latency (hit): 12.00 ms"));
    }
}
