//! Extraction and iteration options
//!
//! Callers pass a list of [`UpdateOption`]s; [`UpdateOptions::resolve`]
//! folds them into one immutable value. Later options override earlier ones.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use tcgharvest_core::config::ExtractConfig;
use tcgharvest_core::{IterError, MAX_ITER_PARALLEL};

use crate::dataset::ItemKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOption {
    /// Re-extract items already in the store
    Reparse,
    /// Bypass the fetch cache
    FetchReplaceAll,
    Parallel(usize),
    /// Case-insensitive regexes; only matching sections are extracted
    SectionOnly(Vec<String>),
    /// Pages to walk; ignored when not positive
    ScrollLimit(i64),
    /// First listing page; must be non-negative
    ScrollStart(i64),
    /// Stop after this many successful items; ignored when not positive
    ItemLimit(i64),
    /// Extract exactly these URLs, skipping listing discovery
    ItemOnlyUrls(Vec<String>),
    /// Print each written collection to stdout
    Cat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    NegativeScrollStart(i64),
    ZeroParallel,
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeScrollStart(n) => write!(f, "start page must be non-negative: {n}"),
            Self::ZeroParallel => f.write_str("parallel must be positive"),
        }
    }
}

impl std::error::Error for OptionsError {}

/// Compiled section patterns; `None` marks a pattern that failed to compile.
type SectionCache = Arc<RwLock<HashMap<String, Option<Regex>>>>;

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub reparse: bool,
    pub fetch_replace_all: bool,
    pub parallel: usize,
    pub section_only: Vec<String>,
    pub scroll_limit: Option<u32>,
    pub scroll_start: Option<u32>,
    pub item_limit: Option<usize>,
    pub item_only_urls: Vec<String>,
    pub cat: bool,
    section_cache: SectionCache,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            reparse: false,
            fetch_replace_all: false,
            parallel: ExtractConfig::default().parallel,
            section_only: Vec::new(),
            scroll_limit: None,
            scroll_start: None,
            item_limit: None,
            item_only_urls: Vec::new(),
            cat: false,
            section_cache: SectionCache::default(),
        }
    }
}

impl UpdateOptions {
    pub fn resolve(options: &[UpdateOption]) -> Result<Self, OptionsError> {
        Self::resolve_with(&ExtractConfig::default(), options)
    }

    /// Resolve on top of the configured `[extract]` defaults.
    pub fn resolve_with(defaults: &ExtractConfig, options: &[UpdateOption]) -> Result<Self, OptionsError> {
        if defaults.parallel == 0 {
            return Err(OptionsError::ZeroParallel);
        }
        let mut o = Self {
            parallel: defaults.parallel,
            ..Self::default()
        };
        for opt in options {
            match opt {
                UpdateOption::Reparse => o.reparse = true,
                UpdateOption::FetchReplaceAll => o.fetch_replace_all = true,
                UpdateOption::Parallel(n) => {
                    if *n == 0 {
                        return Err(OptionsError::ZeroParallel);
                    }
                    o.parallel = *n;
                }
                UpdateOption::SectionOnly(patterns) => o.section_only.extend(patterns.iter().cloned()),
                UpdateOption::ScrollLimit(n) => o.scroll_limit = u32::try_from(*n).ok().filter(|n| *n > 0),
                UpdateOption::ScrollStart(n) => {
                    if *n < 0 {
                        return Err(OptionsError::NegativeScrollStart(*n));
                    }
                    o.scroll_start = Some(u32::try_from(*n).unwrap_or(u32::MAX));
                }
                UpdateOption::ItemLimit(n) => o.item_limit = usize::try_from(*n).ok().filter(|n| *n > 0),
                UpdateOption::ItemOnlyUrls(urls) => o.item_only_urls.extend(urls.iter().cloned()),
                UpdateOption::Cat => o.cat = true,
            }
        }
        Ok(o)
    }

    /// Whether `section` passes the `SectionOnly` filter (always true without one).
    pub fn section(&self, section: &str) -> bool {
        if self.section_only.is_empty() {
            return true;
        }
        self.section_only.iter().any(|pattern| {
            self.compiled(pattern)
                .is_some_and(|re| re.is_match(section))
        })
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        if let Some(hit) = self
            .section_cache
            .read()
            .expect("section cache poisoned")
            .get(pattern)
        {
            return hit.clone();
        }

        let mut cache = self.section_cache.write().expect("section cache poisoned");
        // Another worker may have compiled it while we waited for the write lock
        if let Some(hit) = cache.get(pattern) {
            return hit.clone();
        }
        let compiled = match Regex::new(&format!("(?i){pattern}")) {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("invalid section pattern {pattern:?}: {e}");
                None
            }
        };
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }

    /// Whether `count` successful items reach the `ItemLimit`.
    pub fn item_limit_reached(&self, count: usize) -> bool {
        self.item_limit.is_some_and(|limit| count >= limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterOption {
    Parallel(usize),
    /// Yield only items of this kind
    FilterType(ItemKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterOptions {
    pub parallel: usize,
    pub only: Option<ItemKind>,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            parallel: ExtractConfig::default().iter_parallel,
            only: None,
        }
    }
}

impl IterOptions {
    pub fn resolve(options: &[IterOption]) -> Result<Self, IterError> {
        Self::resolve_with(&ExtractConfig::default(), options)
    }

    /// Resolve on top of the configured `[extract]` defaults.
    pub fn resolve_with(defaults: &ExtractConfig, options: &[IterOption]) -> Result<Self, IterError> {
        let mut o = Self {
            parallel: defaults.iter_parallel,
            only: None,
        };
        for opt in options {
            match *opt {
                IterOption::Parallel(n) => o.parallel = n,
                IterOption::FilterType(kind) => o.only = Some(kind),
            }
        }
        if !(1..=MAX_ITER_PARALLEL).contains(&o.parallel) {
            return Err(IterError::Parallel(o.parallel));
        }
        Ok(o)
    }

    /// Whether items of `kind` pass the `FilterType` option.
    pub fn wants(&self, kind: ItemKind) -> bool {
        self.only.map_or(true, |only| only == kind)
    }
}
