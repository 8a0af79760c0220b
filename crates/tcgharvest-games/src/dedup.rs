//! Cross-source duplicate detection by card-list signature
//!
//! The same tournament deck is often published by several sites. Each
//! distinct card list gets one canonical record, chosen by source priority.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tcgharvest_store::{hash_bytes, BlobStore};

use crate::collection::Collection;

/// Order-independent signature of a collection's cards.
pub fn deck_signature(collection: &Collection) -> String {
    let mut entries: Vec<String> = collection
        .partitions
        .iter()
        .flat_map(|p| {
            p.cards
                .iter()
                .map(move |c| format!("{}:{}:{}", p.name, c.name, c.count))
        })
        .collect();
    entries.sort_unstable();
    hash_bytes(entries.join("|").as_bytes()).to_hex().to_string()
}

/// Higher wins when picking the canonical record.
pub fn source_priority(source: &str) -> u8 {
    match source {
        "scryfall" => 10,
        "mtgtop8" => 9,
        "goldfish" => 8,
        "deckbox" => 7,
        "ygoprodeck" => 6,
        "limitless-web" => 5,
        "pokemoncard-io" => 4,
        _ => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckSignature {
    pub card_signature: String,
    pub sources: Vec<String>,
    pub canonical_id: String,
    pub canonical_url: String,
    pub canonical_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub duplicate: bool,
    pub canonical_id: String,
    pub canonical_url: String,
}

pub struct DedupTracker {
    store: Arc<dyn BlobStore>,
    key: String,
    signatures: RwLock<HashMap<String, DeckSignature>>,
}

impl DedupTracker {
    /// Load the signature index kept under `prefix`, or start empty.
    pub fn open(store: Arc<dyn BlobStore>, prefix: &str) -> Result<Self> {
        let key = format!("{}/.deduplication.json", prefix.trim_end_matches('/'));
        let signatures = match store.read(&key) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse dedup index {key}"))?,
            Err(e) if e.is_not_found() => HashMap::new(),
            Err(e) => return Err(e).with_context(|| format!("failed to load dedup index {key}")),
        };
        Ok(Self {
            store,
            key,
            signatures: RwLock::new(signatures),
        })
    }

    pub fn len(&self) -> usize {
        self.signatures.read().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `collection` and report whether another source already has its card list.
    pub fn find_duplicate(&self, collection: &Collection) -> DedupOutcome {
        let signature = deck_signature(collection);
        let source = collection.source.as_deref().unwrap_or_default();

        if let Some(entry) = self.signatures.read().expect("dedup lock poisoned").get(&signature) {
            if entry.canonical_id == collection.id && entry.canonical_source == source {
                return DedupOutcome {
                    duplicate: false,
                    canonical_id: entry.canonical_id.clone(),
                    canonical_url: entry.canonical_url.clone(),
                };
            }
        }

        let mut signatures = self.signatures.write().expect("dedup lock poisoned");
        let Some(entry) = signatures.get_mut(&signature) else {
            signatures.insert(
                signature.clone(),
                DeckSignature {
                    card_signature: signature,
                    sources: vec![source.to_string()],
                    canonical_id: collection.id.clone(),
                    canonical_url: collection.url.clone(),
                    canonical_source: source.to_string(),
                },
            );
            return DedupOutcome {
                duplicate: false,
                canonical_id: collection.id.clone(),
                canonical_url: collection.url.clone(),
            };
        };

        // Registered while we waited for the write lock
        if entry.canonical_id == collection.id && entry.canonical_source == source {
            return DedupOutcome {
                duplicate: false,
                canonical_id: entry.canonical_id.clone(),
                canonical_url: entry.canonical_url.clone(),
            };
        }
        if !entry.sources.iter().any(|s| s == source) {
            entry.sources.push(source.to_string());
        }
        if source_priority(source) > source_priority(&entry.canonical_source) {
            entry.canonical_id = collection.id.clone();
            entry.canonical_url = collection.url.clone();
            entry.canonical_source = source.to_string();
        }
        DedupOutcome {
            duplicate: true,
            canonical_id: entry.canonical_id.clone(),
            canonical_url: entry.canonical_url.clone(),
        }
    }

    /// Source holding the canonical record for `signature`.
    pub fn canonical_source(&self, signature: &str) -> Option<String> {
        self.signatures
            .read()
            .expect("dedup lock poisoned")
            .get(signature)
            .map(|e| e.canonical_source.clone())
    }

    pub fn save(&self) -> Result<()> {
        let bytes = {
            let signatures = self.signatures.read().expect("dedup lock poisoned");
            serde_json::to_vec(&*signatures)?
        };
        self.store
            .write(&self.key, &bytes)
            .with_context(|| format!("failed to save dedup index {}", self.key))
    }
}
