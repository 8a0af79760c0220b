//! Freshness audit of a source's stored corpus

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::{Deserialize, Serialize};
use tcgharvest_core::config::HealthConfig;
use tcgharvest_core::{fmt_num, iterate_prefix, CancelToken, IterError};
use tcgharvest_store::BlobStore;

use crate::collection::Collection;
use crate::dataset::Description;
use crate::registry::TypeRegistry;

/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Stale,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Stale => "stale",
        })
    }
}

/// Raw counts gathered while walking a corpus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthTally {
    pub total: u64,
    pub items_last_24h: u64,
    pub items_last_7d: u64,
    pub stale_items: u64,
    /// Records that could not be read or decoded
    pub errors: u64,
    pub age_sum_secs: f64,
    pub newest: Option<DateTime<Utc>>,
}

impl HealthTally {
    /// Count one record last touched at `at`.
    pub fn observe(&mut self, at: DateTime<Utc>, now: DateTime<Utc>, stale_after: Duration) {
        let age = now - at;
        self.total += 1;
        if age <= Duration::hours(24) {
            self.items_last_24h += 1;
        }
        if age <= Duration::days(7) {
            self.items_last_7d += 1;
        }
        if age > stale_after {
            self.stale_items += 1;
        }
        self.age_sum_secs += age.num_seconds().max(0) as f64;
        self.newest = Some(self.newest.map_or(at, |n| n.max(at)));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub dataset_name: String,
    pub last_extraction: Option<DateTime<Utc>>,
    pub total_items: u64,
    pub items_last_24h: u64,
    pub items_last_7d: u64,
    pub stale_items: u64,
    /// Errors per 1000 records touched
    pub error_rate: f64,
    /// Mean record age in seconds
    #[serde(rename = "avg_age")]
    pub avg_age_secs: f64,
    pub freshness_score: f64,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheck {
    /// Derive status and issues from a finished tally.
    pub fn evaluate(dataset_name: &str, tally: &HealthTally, config: &HealthConfig) -> Self {
        let touched = tally.total + tally.errors;
        let error_rate = if touched == 0 {
            0.0
        } else {
            tally.errors as f64 * 1000.0 / touched as f64
        };
        let (freshness_score, avg_age_secs) = if tally.total == 0 {
            (0.0, 0.0)
        } else {
            (
                tally.items_last_24h as f64 / tally.total as f64,
                tally.age_sum_secs / tally.total as f64,
            )
        };

        let mut check = Self {
            dataset_name: dataset_name.to_string(),
            last_extraction: tally.newest,
            total_items: tally.total,
            items_last_24h: tally.items_last_24h,
            items_last_7d: tally.items_last_7d,
            stale_items: tally.stale_items,
            error_rate,
            avg_age_secs,
            freshness_score,
            status: HealthStatus::Healthy,
            issues: Vec::new(),
            checked_at: Utc::now(),
        };

        if tally.total == 0 {
            check.flag(HealthStatus::Stale, "no items found".to_string());
            return check;
        }
        if tally.items_last_24h == 0 {
            check.flag(HealthStatus::Stale, "no items extracted in the last 24h".to_string());
        } else if freshness_score < config.low_freshness {
            check.flag(
                HealthStatus::Stale,
                format!("freshness score {freshness_score:.2} below {:.2}", config.low_freshness),
            );
        } else if freshness_score < config.mid_freshness {
            check.flag(
                HealthStatus::Degraded,
                format!("freshness score {freshness_score:.2} below {:.2}", config.mid_freshness),
            );
        }
        if error_rate > config.max_error_rate {
            check.flag(
                HealthStatus::Degraded,
                format!("error rate {error_rate:.1}/1000 above {:.1}", config.max_error_rate),
            );
        }
        if tally.stale_items * 2 > tally.total {
            check.flag(
                HealthStatus::Stale,
                format!(
                    "{} of {} items older than {} days",
                    tally.stale_items, tally.total, config.stale_after_days
                ),
            );
        }
        check
    }

    fn flag(&mut self, status: HealthStatus, issue: String) {
        self.status = self.status.max(status);
        self.issues.push(issue);
    }

    pub fn format_table(&self) -> String {
        let status_color = match self.status {
            HealthStatus::Healthy => Color::Green,
            HealthStatus::Degraded => Color::Yellow,
            HealthStatus::Stale => Color::Red,
        };
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(&self.dataset_name)
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new(self.status.to_string()).fg(status_color),
            ]);

        let last = self
            .last_extraction
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        let rows = [
            ("Total items", fmt_num(self.total_items as usize)),
            ("Last 24h", fmt_num(self.items_last_24h as usize)),
            ("Last 7d", fmt_num(self.items_last_7d as usize)),
            ("Stale", fmt_num(self.stale_items as usize)),
            ("Freshness", format!("{:.2}", self.freshness_score)),
            ("Errors /1000", format!("{:.1}", self.error_rate)),
            ("Avg age", format!("{:.1}d", self.avg_age_secs / 86_400.0)),
            ("Last extraction", last),
        ];
        for (label, value) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(value)]);
        }
        for issue in &self.issues {
            table.add_row(vec![Cell::new("Issue").fg(status_color), Cell::new(issue)]);
        }
        format!("\n{table}")
    }
}

fn health_key(game: &str, source: &str) -> String {
    format!("health/{game}/{source}.json")
}

/// Walks stored collections and persists [`HealthCheck`]s to the state store.
pub struct HealthMonitor {
    games: Arc<dyn BlobStore>,
    state: Arc<dyn BlobStore>,
    registry: Arc<TypeRegistry>,
    config: HealthConfig,
    parallel: usize,
}

impl HealthMonitor {
    pub fn new(
        games: Arc<dyn BlobStore>,
        state: Arc<dyn BlobStore>,
        registry: Arc<TypeRegistry>,
        config: HealthConfig,
    ) -> Self {
        Self {
            games,
            state,
            registry,
            config,
            parallel: tcgharvest_core::DEFAULT_ITER_PARALLEL,
        }
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    /// Audit every record of `dataset`. Undecodable records count as errors.
    pub fn check(&self, cancel: &CancelToken, dataset: &Description) -> Result<HealthCheck, IterError> {
        let now = Utc::now();
        let stale_after = Duration::days(self.config.stale_after_days);
        let tally = Mutex::new(HealthTally::default());
        let errors = AtomicU64::new(0);
        let seen = AtomicUsize::new(0);

        iterate_prefix(
            cancel,
            self.games.as_ref(),
            &dataset.prefix(),
            self.parallel,
            |key, bytes| {
                if dataset.is_card_key(key) {
                    return Ok(None);
                }
                match Collection::from_json(bytes, &self.registry) {
                    Ok(c) => Ok(Some(c.freshness_time())),
                    Err(e) => {
                        log::debug!("health: skipping {key}: {e}");
                        errors.fetch_add(1, Ordering::Relaxed);
                        Ok(None)
                    }
                }
            },
            |at: Option<DateTime<Utc>>| {
                seen.fetch_add(1, Ordering::Relaxed);
                if let Some(at) = at {
                    tally
                        .lock()
                        .expect("health tally poisoned")
                        .observe(at, now, stale_after);
                }
                Ok(())
            },
        )?;

        let mut tally = tally.into_inner().expect("health tally poisoned");
        tally.errors = errors.into_inner();
        log::debug!(
            "health: walked {} records of {}",
            seen.load(Ordering::Relaxed),
            dataset
        );
        Ok(HealthCheck::evaluate(&dataset.to_string(), &tally, &self.config))
    }

    pub fn save(&self, dataset: &Description, check: &HealthCheck) -> Result<()> {
        let key = health_key(&dataset.game, &dataset.name);
        let bytes = serde_json::to_vec_pretty(check)?;
        self.state
            .write(&key, &bytes)
            .with_context(|| format!("failed to save health check {key}"))
    }

    /// Last persisted check, if any.
    pub fn load(&self, dataset: &Description) -> Result<Option<HealthCheck>> {
        let key = health_key(&dataset.game, &dataset.name);
        match self.state.read(&key) {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("failed to parse health check {key}"))?,
            )),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to load health check {key}")),
        }
    }

    /// Check and persist, logging the outcome.
    pub fn check_and_save(&self, cancel: &CancelToken, dataset: &Description) -> Result<HealthCheck> {
        let check = self
            .check(cancel, dataset)
            .with_context(|| format!("health check of {dataset} failed"))?;
        self.save(dataset, &check)?;
        match check.status {
            HealthStatus::Healthy => log::info!("{dataset}: healthy ({} items)", check.total_items),
            status => log::warn!("{dataset}: {status}: {}", check.issues.join("; ")),
        }
        Ok(check)
    }
}
