//! Card co-occurrence counting over stored collections

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use tcgharvest_core::{stop, CancelToken, DEFAULT_ITER_PARALLEL};
use tcgharvest_games::{Collection, Dataset, IterOption, Item, Partition};

use crate::export::{AttributeMap, CardAttributes, CooccurrenceReport};

/// Both counters for one unordered card pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairCounts {
    /// Partitions the two cards appeared in together
    pub set: u64,
    /// Copy pairs: product of the two counts, summed over partitions
    pub multiset: u64,
}

impl PairCounts {
    fn add(&mut self, other: PairCounts) {
        self.set += other.set;
        self.multiset += other.multiset;
    }
}

/// Pair key with the names in lexicographic order.
pub type PairKey = (String, String);
pub type PairMap = FxHashMap<PairKey, PairCounts>;

fn pair_key(a: &str, b: &str) -> PairKey {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Add every pair from one partition to `pairs`.
///
/// A card with `count > 1` also pairs with itself: multiset `count - 1`,
/// set 0.
pub fn accumulate_partition(pairs: &mut PairMap, partition: &Partition) {
    let cards = &partition.cards;
    for (i, a) in cards.iter().enumerate() {
        let count_a = a.count.max(0) as u64;
        if count_a > 1 {
            pairs
                .entry((a.name.clone(), a.name.clone()))
                .or_default()
                .multiset += count_a - 1;
        }
        for b in &cards[i + 1..] {
            if a.name == b.name {
                continue;
            }
            let counts = pairs.entry(pair_key(&a.name, &b.name)).or_default();
            counts.set += 1;
            counts.multiset += count_a * b.count.max(0) as u64;
        }
    }
}

/// Fold `local` into `total`.
pub fn merge(total: &mut PairMap, local: PairMap) {
    for (key, counts) in local {
        total.entry(key).or_default().add(counts);
    }
}

pub struct CooccurrenceTransform {
    /// Stop after this many collections
    pub limit: Option<usize>,
    pub parallel: usize,
    /// Partition names to count; empty counts all
    pub partitions: Vec<String>,
}

impl Default for CooccurrenceTransform {
    fn default() -> Self {
        Self {
            limit: None,
            parallel: DEFAULT_ITER_PARALLEL,
            partitions: Vec::new(),
        }
    }
}

impl CooccurrenceTransform {
    fn counts_partition(&self, name: &str) -> bool {
        self.partitions.is_empty() || self.partitions.iter().any(|p| p == name)
    }

    /// Pairs of one collection, restricted to the allowed partitions.
    pub fn collection_pairs(&self, collection: &Collection) -> PairMap {
        let mut local = PairMap::default();
        for partition in &collection.partitions {
            if self.counts_partition(&partition.name) {
                accumulate_partition(&mut local, partition);
            }
        }
        local
    }

    /// Count pairs across every collection of `datasets`, in order.
    ///
    /// Card records met along the way are kept as per-card attributes; they
    /// do not count toward `limit`.
    pub fn run(&self, cancel: &CancelToken, datasets: &[&dyn Dataset]) -> Result<CooccurrenceReport> {
        let pairs = Mutex::new(PairMap::default());
        let attributes = Mutex::new(AttributeMap::new());
        let collections = AtomicUsize::new(0);
        let limit_reached = || self.limit.is_some_and(|l| collections.load(Ordering::SeqCst) >= l);

        let mut games: Vec<String> = Vec::new();
        for dataset in datasets {
            if limit_reached() {
                break;
            }
            let desc = dataset.description();
            if !games.contains(&desc.game) {
                games.push(desc.game.clone());
            }
            log::info!("cardco: counting pairs in {desc}");

            dataset
                .iter_items(
                    cancel,
                    &|item: Item| {
                        let collection = match item {
                            Item::Collection(c) => c,
                            Item::Card(card) => {
                                let attrs = CardAttributes {
                                    cmc: card.cmc,
                                    type_line: card.type_line().to_string(),
                                };
                                attributes
                                    .lock()
                                    .expect("attribute map poisoned")
                                    .insert(card.name, attrs);
                                return Ok(());
                            }
                        };
                        if let Some(limit) = self.limit {
                            if collections.fetch_add(1, Ordering::SeqCst) >= limit {
                                collections.fetch_sub(1, Ordering::SeqCst);
                                return Err(stop());
                            }
                        } else {
                            collections.fetch_add(1, Ordering::SeqCst);
                        }
                        let local = self.collection_pairs(&collection);
                        merge(&mut pairs.lock().expect("pair map poisoned"), local);
                        Ok(())
                    },
                    &[IterOption::Parallel(self.parallel)],
                )
                .with_context(|| format!("cardco over {desc} failed"))?;
        }

        let pairs = pairs.into_inner().expect("pair map poisoned");
        let attributes = attributes.into_inner().expect("attribute map poisoned");
        let total = collections.into_inner();
        log::info!(
            "cardco: {} pairs from {} collections, {} card attributes",
            pairs.len(),
            total,
            attributes.len()
        );
        Ok(CooccurrenceReport::from_pairs(pairs, total, games.join(",")).with_attributes(attributes))
    }
}
