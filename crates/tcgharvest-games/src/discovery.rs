//! Crawl-position tracking for incremental, resumable listings
//!
//! State lives at `discovery/{source}.json`. The load-modify-save cycle is
//! not atomic across processes; one crawler per source is assumed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tcgharvest_core::config::DiscoveryConfig;
use tcgharvest_store::BlobStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryState {
    pub last_page_seen: u32,
    /// Newest item URL seen by the last completed crawl
    pub last_item_seen: Option<String>,
    pub last_item_date: Option<DateTime<Utc>>,
    pub last_discovery: Option<DateTime<Utc>>,
    pub items_since_start: u64,
}

impl DiscoveryState {
    /// Page to start from at `now`.
    ///
    /// A run within `freshness` resumes a few pages before where it
    /// stopped, to pick up items listed late. Anything older starts over.
    pub fn start_page(&self, now: DateTime<Utc>, freshness: Duration, max_pages_to_skip: u32) -> u32 {
        match self.last_discovery {
            Some(last) if now - last < freshness => {
                self.last_page_seen.saturating_sub(max_pages_to_skip).max(1)
            }
            _ => 1,
        }
    }
}

pub struct DiscoveryTracker {
    store: Arc<dyn BlobStore>,
    config: DiscoveryConfig,
    cache: RwLock<HashMap<String, DiscoveryState>>,
}

fn state_key(source: &str) -> String {
    format!("discovery/{source}.json")
}

impl DiscoveryTracker {
    pub fn new(store: Arc<dyn BlobStore>, config: DiscoveryConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Cached state, loading it on first use. Missing state is a fresh default.
    pub fn load(&self, source: &str) -> Result<DiscoveryState> {
        if let Some(state) = self.cache.read().expect("discovery lock poisoned").get(source) {
            return Ok(state.clone());
        }

        let key = state_key(source);
        let state = match self.store.read(&key) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse discovery state {key}"))?,
            Err(e) if e.is_not_found() => DiscoveryState::default(),
            Err(e) => return Err(e).with_context(|| format!("failed to load discovery state {key}")),
        };
        self.cache
            .write()
            .expect("discovery lock poisoned")
            .entry(source.to_string())
            .or_insert(state.clone());
        Ok(state)
    }

    pub fn save(&self, source: &str, state: &DiscoveryState) -> Result<()> {
        let key = state_key(source);
        let bytes = serde_json::to_vec_pretty(state)?;
        self.store
            .write(&key, &bytes)
            .with_context(|| format!("failed to save discovery state {key}"))?;
        self.cache
            .write()
            .expect("discovery lock poisoned")
            .insert(source.to_string(), state.clone());
        Ok(())
    }

    fn update(&self, source: &str, f: impl FnOnce(&mut DiscoveryState)) -> Result<()> {
        let mut state = self.load(source)?;
        f(&mut state);
        self.save(source, &state)
    }

    /// Listing page to start crawling `source` from.
    pub fn get_start_page(&self, source: &str, max_pages_to_skip: u32) -> Result<u32> {
        let state = self.load(source)?;
        let freshness = Duration::minutes(self.config.freshness_minutes);
        let page = state.start_page(Utc::now(), freshness, max_pages_to_skip);
        if page > 1 {
            log::info!(
                "{source}: resuming discovery at page {page} (last seen {})",
                state.last_page_seen
            );
        }
        Ok(page)
    }

    /// Count re-encounters of the last known item; true once `max_consecutive_known` is reached.
    pub fn should_stop_discovery(
        &self,
        source: &str,
        item_url: &str,
        consecutive: &mut u32,
        max_consecutive_known: u32,
    ) -> Result<bool> {
        let state = self.load(source)?;
        if state.last_item_seen.as_deref() == Some(item_url) {
            *consecutive += 1;
        }
        Ok(*consecutive >= max_consecutive_known)
    }

    /// Persist that listing page `page` was walked.
    pub fn record_page(&self, source: &str, page: u32) -> Result<()> {
        self.update(source, |s| {
            s.last_page_seen = page;
            s.last_discovery = Some(Utc::now());
        })
    }

    /// Persist the end of a crawl: newest item seen and items processed.
    pub fn complete(
        &self,
        source: &str,
        newest_item: Option<(String, Option<DateTime<Utc>>)>,
        items: u64,
    ) -> Result<()> {
        self.update(source, |s| {
            if let Some((url, date)) = newest_item {
                s.last_item_seen = Some(url);
                s.last_item_date = date;
            }
            s.items_since_start += items;
            s.last_discovery = Some(Utc::now());
        })
    }
}
