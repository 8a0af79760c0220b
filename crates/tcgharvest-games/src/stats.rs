//! Per-run extraction statistics and the error taxonomy
//!
//! One [`ExtractionStats`] is created per `extract` run and handed down to
//! the source plugin explicitly; any worker may record into it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Serialize;
use tcgharvest_core::fmt_num;
use tcgharvest_core::progress::rate;

/// Individual errors kept per run; older ones are dropped.
pub const MAX_RECENT_ERRORS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    RateLimit,
    Parsing,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Parsing => "parsing",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const NETWORK: &[&str] = &["connection", "timeout", "timed out", "dial", "refused", "no such host"];
const RATE_LIMIT: &[&str] = &["rate limit", "throttle", "too many requests", "429"];
const PARSING: &[&str] = &["parse", "unmarshal", "invalid json", "syntax", "malformed"];
const VALIDATION: &[&str] = &["invalid", "validation", "empty", "missing", "required"];

/// Classify an error message by case-insensitive keyword match.
///
/// Categories are tried in order, so "invalid json" is parsing, not validation.
pub fn categorize_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if hit(NETWORK) {
        ErrorCategory::Network
    } else if hit(RATE_LIMIT) {
        ErrorCategory::RateLimit
    } else if hit(PARSING) {
        ErrorCategory::Parsing
    } else if hit(VALIDATION) {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Unknown
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionError {
    pub url: String,
    pub source: String,
    pub error: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    successful: usize,
    failed: usize,
    skipped: usize,
    over_limit: usize,
    normalized: usize,
    duplicates: usize,
    cache_hits: usize,
    cache_misses: usize,
    by_category: BTreeMap<ErrorCategory, usize>,
    validation_failures: BTreeMap<String, usize>,
    recent: VecDeque<ExtractionError>,
}

/// Snapshot of a run, as exported by [`ExtractionStats::export_json`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Parsed items dropped because `ItemLimit` was already reached
    pub over_limit: usize,
    pub success_rate: f64,
    pub normalized: usize,
    pub duplicates: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub errors_by_category: BTreeMap<ErrorCategory, usize>,
    pub validation_failures: BTreeMap<String, usize>,
    pub recent_errors: Vec<ExtractionError>,
}

pub struct ExtractionStats {
    started: Instant,
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl Default for ExtractionStats {
    fn default() -> Self {
        Self::new()
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        f(&mut self.counters.lock().expect("stats lock poisoned"))
    }

    pub fn record_success(&self) {
        self.with(|c| c.successful += 1);
    }

    /// Item already stored and not re-extracted.
    pub fn record_skipped(&self) {
        self.with(|c| c.skipped += 1);
    }

    pub fn record_over_limit(&self) {
        self.with(|c| c.over_limit += 1);
    }

    pub fn record_normalized(&self) {
        self.with(|c| c.normalized += 1);
    }

    pub fn record_duplicate(&self) {
        self.with(|c| c.duplicates += 1);
    }

    pub fn record_cache_hit(&self) {
        self.with(|c| c.cache_hits += 1);
    }

    pub fn record_cache_miss(&self) {
        self.with(|c| c.cache_misses += 1);
    }

    pub fn record_validation_failure(&self, kind: &str) {
        self.with(|c| *c.validation_failures.entry(kind.to_string()).or_default() += 1);
    }

    /// Count a failed item, classified by [`categorize_error`], and keep it
    /// in the recent-error ring.
    pub fn record_error(&self, url: &str, source: &str, err: &dyn std::fmt::Display) -> ErrorCategory {
        let error = format!("{err:#}");
        let category = categorize_error(&error);
        self.push_error(url, source, error, category);
        category
    }

    /// Like [`Self::record_error`] for failures whose category is already known.
    pub fn record_error_as(&self, url: &str, source: &str, err: &dyn std::fmt::Display, category: ErrorCategory) {
        self.push_error(url, source, format!("{err:#}"), category);
    }

    fn push_error(&self, url: &str, source: &str, error: String, category: ErrorCategory) {
        log::warn!("{source}: {url}: [{category}] {error}");
        let entry = ExtractionError {
            url: url.to_string(),
            source: source.to_string(),
            error,
            category,
            timestamp: Utc::now(),
        };
        self.with(|c| {
            c.failed += 1;
            *c.by_category.entry(category).or_default() += 1;
            if c.recent.len() == MAX_RECENT_ERRORS {
                c.recent.pop_front();
            }
            c.recent.push_back(entry);
        });
    }

    pub fn successful(&self) -> usize {
        self.with(|c| c.successful)
    }

    pub fn failed(&self) -> usize {
        self.with(|c| c.failed)
    }

    /// Items attempted (successful + failed).
    pub fn total(&self) -> usize {
        self.with(|c| c.successful + c.failed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Cache hits over all fetches, 0 when nothing was fetched.
    pub fn hit_rate(&self) -> f64 {
        self.with(|c| pct(c.cache_hits, c.cache_hits + c.cache_misses) / 100.0)
    }

    pub fn report(&self) -> StatsReport {
        let elapsed = self.elapsed();
        self.with(|c| {
            let total = c.successful + c.failed;
            StatsReport {
                started_at: self.started_at,
                elapsed_secs: elapsed.as_secs_f64(),
                total,
                successful: c.successful,
                failed: c.failed,
                skipped: c.skipped,
                over_limit: c.over_limit,
                success_rate: pct(c.successful, total),
                normalized: c.normalized,
                duplicates: c.duplicates,
                cache_hits: c.cache_hits,
                cache_misses: c.cache_misses,
                cache_hit_rate: pct(c.cache_hits, c.cache_hits + c.cache_misses) / 100.0,
                errors_by_category: c.by_category.clone(),
                validation_failures: c.validation_failures.clone(),
                recent_errors: c.recent.iter().cloned().collect(),
            }
        })
    }

    /// One-line digest: counts, success rate, elapsed, throughput.
    pub fn summary(&self) -> String {
        let r = self.report();
        let elapsed = Duration::from_secs_f64(r.elapsed_secs);
        format!(
            "{} items: {} successful, {} failed ({:.1}% success) in {:.1}s ({:.1} items/s)",
            fmt_num(r.total),
            fmt_num(r.successful),
            fmt_num(r.failed),
            r.success_rate,
            r.elapsed_secs,
            rate(r.total, elapsed),
        )
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.report())
    }

    pub fn format_table(&self, title: &str) -> String {
        let r = self.report();
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(title)
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        table.add_row(vec![
            Cell::new("Successful").fg(Color::Green),
            Cell::new(fmt_num(r.successful)).fg(Color::Green),
            Cell::new(format!("{:.1}", r.success_rate)).fg(Color::Green),
        ]);
        let failed_color = if r.failed > 0 { Color::Red } else { Color::Reset };
        table.add_row(vec![
            Cell::new("Failed").fg(failed_color),
            Cell::new(fmt_num(r.failed)).fg(failed_color),
            Cell::new(format!("{:.1}", pct(r.failed, r.total))),
        ]);
        table.add_row(vec![
            Cell::new("Skipped (existing)"),
            Cell::new(fmt_num(r.skipped)),
            Cell::new(""),
        ]);
        if r.over_limit > 0 {
            table.add_row(vec![
                Cell::new("Over item limit"),
                Cell::new(fmt_num(r.over_limit)),
                Cell::new(""),
            ]);
        }
        table.add_row(vec![
            Cell::new("Normalized"),
            Cell::new(fmt_num(r.normalized)),
            Cell::new(format!("{:.1}", pct(r.normalized, r.successful))),
        ]);
        if r.duplicates > 0 {
            table.add_row(vec![
                Cell::new("Cross-source duplicates"),
                Cell::new(fmt_num(r.duplicates)),
                Cell::new(""),
            ]);
        }
        table.add_row(vec![
            Cell::new("Cache hits"),
            Cell::new(format!(
                "{}/{}",
                fmt_num(r.cache_hits),
                fmt_num(r.cache_hits + r.cache_misses)
            )),
            Cell::new(format!("{:.1}", r.cache_hit_rate * 100.0)),
        ]);
        for (category, n) in &r.errors_by_category {
            table.add_row(vec![
                Cell::new(format!("  {category} errors")),
                Cell::new(fmt_num(*n)),
                Cell::new(format!("{:.1}", pct(*n, r.failed))),
            ]);
        }
        for (kind, n) in &r.validation_failures {
            table.add_row(vec![
                Cell::new(format!("  invalid: {kind}")),
                Cell::new(fmt_num(*n)),
                Cell::new(""),
            ]);
        }
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", r.elapsed_secs)),
            Cell::new(""),
        ]);

        format!("\n{table}")
    }

    /// Log the summary plus the first few recorded errors.
    pub fn log_report(&self, label: &str) {
        let r = self.report();
        log::info!("{label}: {}", self.summary());
        if r.normalized > 0 {
            log::info!("{label}: normalized card names in {} collections", fmt_num(r.normalized));
        }
        if r.cache_hits + r.cache_misses > 0 {
            log::info!("{label}: cache hit rate {:.1}%", r.cache_hit_rate * 100.0);
        }
        for (kind, n) in &r.validation_failures {
            log::warn!("{label}: {n} collections failed validation ({kind})");
        }
        for e in r.recent_errors.iter().take(5) {
            log::warn!("{label}: [{}] {}: {}", e.category, e.url, e.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_examples() {
        assert_eq!(categorize_error("connection refused"), ErrorCategory::Network);
        assert_eq!(categorize_error("rate limit exceeded"), ErrorCategory::RateLimit);
        assert_eq!(categorize_error("failed to parse JSON"), ErrorCategory::Parsing);
        assert_eq!(categorize_error("invalid card name"), ErrorCategory::Validation);
        assert_eq!(categorize_error("something went wrong"), ErrorCategory::Unknown);
    }

    #[test]
    fn categorize_is_case_insensitive_and_ordered() {
        assert_eq!(categorize_error("Dial TCP: TIMEOUT"), ErrorCategory::Network);
        assert_eq!(categorize_error("HTTP 429"), ErrorCategory::RateLimit);
        assert_eq!(categorize_error("invalid JSON payload"), ErrorCategory::Parsing);
        assert_eq!(categorize_error("collection is invalid: empty id"), ErrorCategory::Validation);
        assert_eq!(categorize_error("silently throttled (rate limit page)"), ErrorCategory::RateLimit);
    }

    #[test]
    fn counters_and_rates() {
        let stats = ExtractionStats::new();
        stats.record_success();
        stats.record_success();
        stats.record_success();
        stats.record_error("https://a.test/1", "mtgtop8", &"connection reset");
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_cache_miss();
        stats.record_cache_miss();
        stats.record_validation_failure("bad_card_name");
        stats.record_validation_failure("bad_card_name");

        let r = stats.report();
        assert_eq!(r.total, 4);
        assert_eq!(r.successful, 3);
        assert_eq!(r.failed, 1);
        assert_eq!(r.success_rate, 75.0);
        assert_eq!(stats.hit_rate(), 0.25);
        assert_eq!(r.errors_by_category[&ErrorCategory::Network], 1);
        assert_eq!(r.validation_failures["bad_card_name"], 2);
    }

    #[test]
    fn explicit_category_skips_keyword_match() {
        let stats = ExtractionStats::new();
        stats.record_error_as(
            "https://a.test/1",
            "mtgtop8",
            &"duplicate card \"Connection Lost\"",
            ErrorCategory::Validation,
        );
        let r = stats.report();
        assert_eq!(r.failed, 1);
        assert_eq!(r.errors_by_category[&ErrorCategory::Validation], 1);
        assert!(!r.errors_by_category.contains_key(&ErrorCategory::Network));
        assert_eq!(r.recent_errors[0].category, ErrorCategory::Validation);
    }

    #[test]
    fn hit_rate_zero_without_fetches() {
        assert_eq!(ExtractionStats::new().hit_rate(), 0.0);
    }

    #[test]
    fn recent_errors_bounded() {
        let stats = ExtractionStats::new();
        for i in 0..(MAX_RECENT_ERRORS + 25) {
            stats.record_error(&format!("u{i}"), "s", &"boom");
        }
        let r = stats.report();
        assert_eq!(r.failed, MAX_RECENT_ERRORS + 25);
        assert_eq!(r.recent_errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(r.recent_errors[0].url, "u25");
    }

    #[test]
    fn summary_and_exports() {
        let stats = ExtractionStats::new();
        stats.record_success();
        stats.record_error("u", "s", &"missing deck list");
        let summary = stats.summary();
        assert!(summary.starts_with("2 items: 1 successful, 1 failed (50.0% success)"), "{summary}");

        let json: serde_json::Value = serde_json::from_str(&stats.export_json().unwrap()).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["errors_by_category"]["validation"], 1);
        assert_eq!(json["recent_errors"][0]["category"], "validation");

        let table = stats.format_table("magic/mtgtop8");
        assert!(table.contains("Successful"));
        assert!(table.contains("validation errors"));
    }

    #[test]
    fn concurrent_recording() {
        let stats = ExtractionStats::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        stats.record_success();
                    }
                });
            }
        });
        assert_eq!(stats.successful(), 800);
    }
}
