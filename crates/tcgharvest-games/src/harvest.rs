//! Generic harvesting loop for paginated listing sites
//!
//! A [`ListingSource`] knows how to read one site: which item URLs a
//! listing page holds and how to turn an item page into a [`Collection`].
//! [`Harvester`] supplies everything else: paging, resumption, the worker
//! pool, canonicalization, and writing records to the store.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use indicatif::ProgressBar;
use tcgharvest_core::config::ExtractConfig;
use tcgharvest_core::{
    panic_message, CancelToken, FetchError, Fetcher, IterError, Page, SharedProgress, WorkQueue,
};
use tcgharvest_store::BlobStore;

use crate::collection::{CanonicalizeError, Collection};
use crate::dataset::{iter_stored_items, Dataset, Description, ItemHandler};
use crate::dedup::DedupTracker;
use crate::discovery::DiscoveryTracker;
use crate::normalize::normalize_collection;
use crate::options::{IterOption, IterOptions, UpdateOption, UpdateOptions};
use crate::registry::TypeRegistry;
use crate::stats::{ErrorCategory, ExtractionStats};

/// What a source plugin sees while extracting.
pub struct SourceContext<'a> {
    pub cancel: &'a CancelToken,
    pub fetcher: &'a Fetcher,
    pub stats: &'a ExtractionStats,
    pub options: &'a UpdateOptions,
    progress: &'a ProgressBar,
}

impl SourceContext<'_> {
    /// Fetch `url` through the cache, honouring `FetchReplaceAll` and recording hits.
    pub fn get(&self, url: &str) -> Result<Page, FetchError> {
        let page = self.fetcher.get(url, self.options.fetch_replace_all)?;
        if page.from_cache {
            self.stats.record_cache_hit();
        } else {
            self.stats.record_cache_miss();
        }
        Ok(page)
    }
}

/// One listing site.
pub trait ListingSource: Send + Sync {
    fn description(&self) -> Description;

    /// Item URLs on listing page `page` (1-based). Empty marks the end.
    fn page_urls(&self, ctx: &SourceContext<'_>, page: u32) -> Result<Vec<String>>;

    /// Stable record id for an item URL.
    fn item_id(&self, url: &str) -> Option<String>;

    fn parse_item(&self, ctx: &SourceContext<'_>, url: &str) -> Result<Collection>;
}

pub struct Harvester<S> {
    source: S,
    games: Arc<dyn BlobStore>,
    registry: Arc<TypeRegistry>,
    discovery: Option<Arc<DiscoveryTracker>>,
    dedup: Option<Arc<DedupTracker>>,
    progress: Option<SharedProgress>,
    defaults: ExtractConfig,
}

impl<S: ListingSource> Harvester<S> {
    pub fn new(source: S, games: Arc<dyn BlobStore>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            source,
            games,
            registry,
            discovery: None,
            dedup: None,
            progress: None,
            defaults: ExtractConfig::default(),
        }
    }

    /// Worker counts used when the caller passes no `Parallel` option.
    pub fn with_extract_config(mut self, defaults: ExtractConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_discovery(mut self, tracker: Arc<DiscoveryTracker>) -> Self {
        self.discovery = Some(tracker);
        self
    }

    pub fn with_dedup(mut self, tracker: Arc<DedupTracker>) -> Self {
        self.dedup = Some(tracker);
        self
    }

    /// Show a spinner line per extract run.
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn start_page(&self, name: &str, opts: &UpdateOptions) -> Result<u32> {
        if let Some(start) = opts.scroll_start {
            return Ok(start.max(1));
        }
        match &self.discovery {
            Some(d) => d.get_start_page(name, d.config().max_pages_to_skip),
            None => Ok(1),
        }
    }

    /// Whether `url` still has to be harvested.
    fn pending(&self, desc: &Description, opts: &UpdateOptions, stats: &ExtractionStats, url: &str) -> bool {
        if opts.reparse || opts.fetch_replace_all {
            return true;
        }
        let Some(id) = self.source.item_id(url) else {
            return true;
        };
        match self.games.exists(&desc.key(&id)) {
            Ok(true) => {
                stats.record_skipped();
                false
            }
            Ok(false) => true,
            Err(e) => {
                log::warn!("{desc}: existence check for {url} failed: {e}");
                true
            }
        }
    }

    /// Parse, check and store one item.
    fn harvest_item(&self, desc: &Description, ctx: &SourceContext<'_>, url: &str, written: &AtomicUsize) -> Result<()> {
        let id = self
            .source
            .item_id(url)
            .ok_or_else(|| anyhow!("no item id in url {url}"))?;

        let mut collection = self.source.parse_item(ctx, url)?;
        if normalize_collection(&mut collection) {
            ctx.stats.record_normalized();
        }
        collection.source = Some(desc.name.clone());
        collection.extracted_at = Some(Utc::now());
        if let Err(e) = collection.canonicalize() {
            ctx.stats.record_validation_failure(e.kind());
            return Err(anyhow::Error::new(e).context("collection is invalid"));
        }

        // Claim a slot under ItemLimit before writing
        if let Some(limit) = ctx.options.item_limit {
            if written.fetch_add(1, Ordering::SeqCst) >= limit {
                written.fetch_sub(1, Ordering::SeqCst);
                ctx.stats.record_over_limit();
                log::debug!("{desc}: item limit reached, dropping {url}");
                return Ok(());
            }
        } else {
            written.fetch_add(1, Ordering::SeqCst);
        }

        let key = desc.key(&id);
        let stored = collection
            .to_json()
            .map_err(anyhow::Error::from)
            .and_then(|bytes| {
                self.games.write(&key, &bytes)?;
                Ok(bytes)
            });
        let bytes = match stored {
            Ok(bytes) => bytes,
            Err(e) => {
                written.fetch_sub(1, Ordering::SeqCst);
                return Err(e.context(format!("failed to write {key}")));
            }
        };

        // Only stored records may become canonical
        if let Some(dedup) = &self.dedup {
            let outcome = dedup.find_duplicate(&collection);
            if outcome.duplicate {
                ctx.stats.record_duplicate();
                log::debug!("{desc}: {url} duplicates {}", outcome.canonical_url);
            }
        }

        if ctx.options.cat {
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        ctx.stats.record_success();
        ctx.progress.inc(1);
        Ok(())
    }

    /// Run every URL through [`Self::harvest_item`] on the pool. Per-item failures are recorded, not returned.
    fn harvest_urls(
        &self,
        pool: &rayon::ThreadPool,
        desc: &Description,
        ctx: &SourceContext<'_>,
        urls: Vec<String>,
        written: &AtomicUsize,
    ) {
        let queue = WorkQueue::filtered(urls, |url| self.pending(desc, ctx.options, ctx.stats, url));
        if queue.total() == 0 {
            return;
        }
        let workers = ctx.options.parallel.min(queue.total());
        let source = desc.name.as_str();

        pool.scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| loop {
                    if ctx.cancel.is_cancelled()
                        || ctx.options.item_limit_reached(written.load(Ordering::SeqCst))
                    {
                        break;
                    }
                    let Some(url) = queue.next() else { break };
                    match catch_unwind(AssertUnwindSafe(|| self.harvest_item(desc, ctx, url, written))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) if e.downcast_ref::<CanonicalizeError>().is_some() => {
                            ctx.stats.record_error_as(url, source, &e, ErrorCategory::Validation);
                        }
                        Ok(Err(e)) => {
                            ctx.stats.record_error(url, source, &e);
                        }
                        Err(payload) => {
                            let message = format!("panic: {}", panic_message(payload.as_ref()));
                            ctx.stats.record_error(url, source, &message);
                        }
                    }
                });
            }
        });
    }
}

impl<S: ListingSource> Dataset for Harvester<S> {
    fn description(&self) -> Description {
        self.source.description()
    }

    fn extract(
        &self,
        cancel: &CancelToken,
        fetcher: &Fetcher,
        stats: &ExtractionStats,
        options: &[UpdateOption],
    ) -> Result<()> {
        let opts = UpdateOptions::resolve_with(&self.defaults, options)?;
        let desc = self.source.description();
        let bar = self
            .progress
            .as_ref()
            .map_or_else(ProgressBar::hidden, |p| p.source_line(&desc.to_string()));
        let ctx = SourceContext {
            cancel,
            fetcher,
            stats,
            options: &opts,
            progress: &bar,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.parallel)
            .thread_name(|i| format!("harvest-{i}"))
            .build()
            .context("failed to build harvest pool")?;
        let written = AtomicUsize::new(0);

        if !opts.item_only_urls.is_empty() {
            log::info!("{desc}: harvesting {} listed urls", opts.item_only_urls.len());
            self.harvest_urls(&pool, &desc, &ctx, opts.item_only_urls.clone(), &written);
        } else {
            self.crawl(&pool, &desc, &ctx, &written)?;
        }

        if let Some(dedup) = &self.dedup {
            dedup.save()?;
        }
        bar.finish_with_message(format!("{} failed", stats.failed()));
        stats.log_report(&desc.to_string());
        cancel.check()?;
        Ok(())
    }

    fn iter_items(
        &self,
        cancel: &CancelToken,
        handler: &ItemHandler<'_>,
        options: &[IterOption],
    ) -> Result<(), IterError> {
        iter_stored_items(
            cancel,
            self.games.as_ref(),
            &self.registry,
            &self.source.description(),
            handler,
            &IterOptions::resolve_with(&self.defaults, options)?,
        )
    }
}

impl<S: ListingSource> Harvester<S> {
    /// Walk listing pages until the listing ends or a limit is hit.
    fn crawl(
        &self,
        pool: &rayon::ThreadPool,
        desc: &Description,
        ctx: &SourceContext<'_>,
        written: &AtomicUsize,
    ) -> Result<()> {
        let opts = ctx.options;
        let mut page = self.start_page(&desc.name, opts)?;
        let mut pages = 0u32;
        let mut consecutive_known = 0u32;
        let mut newest: Option<String> = None;
        log::info!("{desc}: crawling from page {page}");

        loop {
            if ctx.cancel.is_cancelled() {
                log::info!("{desc}: cancelled at page {page}");
                break;
            }
            if opts.scroll_limit.is_some_and(|limit| pages >= limit) {
                log::info!("{desc}: scroll limit reached after {pages} pages");
                break;
            }

            let urls = self
                .source
                .page_urls(ctx, page)
                .with_context(|| format!("{desc}: failed to list page {page}"))?;
            if urls.is_empty() {
                log::info!("{desc}: page {page} is empty, end of listing");
                break;
            }
            if page == 1 && newest.is_none() {
                newest = urls.first().cloned();
            }

            let mut known_territory = false;
            if let Some(d) = &self.discovery {
                let max = d.config().max_consecutive_known;
                for url in &urls {
                    if d.should_stop_discovery(&desc.name, url, &mut consecutive_known, max)? {
                        known_territory = true;
                        break;
                    }
                }
            }

            log::debug!("{desc}: page {page}: {} urls", urls.len());
            ctx.progress.set_message(format!("page {page}"));
            self.harvest_urls(pool, desc, ctx, urls, written);
            pages += 1;
            if let Some(d) = &self.discovery {
                d.record_page(&desc.name, page)?;
            }

            if known_territory {
                log::info!("{desc}: reached known items at page {page}");
                break;
            }
            if opts.item_limit_reached(written.load(Ordering::SeqCst)) {
                log::info!("{desc}: item limit reached");
                break;
            }
            page += 1;
        }

        if let Some(d) = &self.discovery {
            if !ctx.cancel.is_cancelled() {
                let items = written.load(Ordering::SeqCst) as u64;
                d.complete(&desc.name, newest.map(|url| (url, None)), items)?;
            }
        }
        Ok(())
    }
}
