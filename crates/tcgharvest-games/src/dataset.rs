//! The interface every harvested source implements

use std::sync::Arc;

use tcgharvest_core::{iterate_prefix, CancelToken, Fetcher, IterError};
use tcgharvest_store::BlobStore;

use crate::card::Card;
use crate::collection::Collection;
use crate::options::{IterOption, IterOptions, UpdateOption};
use crate::registry::TypeRegistry;
use crate::stats::ExtractionStats;

/// Identifies a dataset: which game, which source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Description {
    pub game: String,
    pub name: String,
}

impl Description {
    pub fn new(game: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            name: name.into(),
        }
    }

    /// Key prefix holding this dataset's records.
    pub fn prefix(&self) -> String {
        format!("{}/{}/", self.game, self.name)
    }

    /// Key of one record.
    pub fn key(&self, id: &str) -> String {
        format!("{}/{}/{id}.json", self.game, self.name)
    }

    /// Key prefix holding this dataset's card records.
    pub fn card_prefix(&self) -> String {
        format!("{}/{}/cards/", self.game, self.name)
    }

    /// Key of one card record. `/` in names (split cards) is escaped.
    pub fn card_key(&self, name: &str) -> String {
        format!("{}{}.json", self.card_prefix(), name.replace('/', "%2F"))
    }

    pub fn is_card_key(&self, key: &str) -> bool {
        key.starts_with(&self.card_prefix())
    }
}

impl std::fmt::Display for Description {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.game, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Collection,
    Card,
}

#[derive(Debug, Clone)]
pub enum Item {
    Collection(Collection),
    Card(Card),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Collection(_) => ItemKind::Collection,
            Self::Card(_) => ItemKind::Card,
        }
    }

    pub fn into_collection(self) -> Option<Collection> {
        match self {
            Self::Collection(c) => Some(c),
            Self::Card(_) => None,
        }
    }

    pub fn into_card(self) -> Option<Card> {
        match self {
            Self::Card(c) => Some(c),
            Self::Collection(_) => None,
        }
    }
}

pub type ItemHandler<'a> = dyn Fn(Item) -> anyhow::Result<()> + Sync + 'a;

pub trait Dataset: Send + Sync {
    fn description(&self) -> Description;

    /// Harvest from the source into the store.
    fn extract(
        &self,
        cancel: &CancelToken,
        fetcher: &Fetcher,
        stats: &ExtractionStats,
        options: &[UpdateOption],
    ) -> anyhow::Result<()>;

    /// Stream every stored record through `handler`.
    fn iter_items(
        &self,
        cancel: &CancelToken,
        handler: &ItemHandler<'_>,
        options: &[IterOption],
    ) -> Result<(), IterError>;
}

/// Read every item stored under `description` and hand it to `handler`.
///
/// Keys under the card prefix decode as [`Card`]s, everything else as
/// [`Collection`]s. Items filtered out by `options.only` are never decoded.
pub fn iter_stored_items(
    cancel: &CancelToken,
    store: &dyn BlobStore,
    registry: &TypeRegistry,
    description: &Description,
    handler: &ItemHandler<'_>,
    options: &IterOptions,
) -> Result<(), IterError> {
    let prefix = match options.only {
        Some(ItemKind::Card) => description.card_prefix(),
        _ => description.prefix(),
    };
    iterate_prefix(
        cancel,
        store,
        &prefix,
        options.parallel,
        |key, bytes| {
            let kind = if description.is_card_key(key) {
                ItemKind::Card
            } else {
                ItemKind::Collection
            };
            if !options.wants(kind) {
                return Ok(None);
            }
            Ok(Some(match kind {
                ItemKind::Card => Item::Card(Card::from_json(bytes)?),
                ItemKind::Collection => Item::Collection(Collection::from_json(bytes, registry)?),
            }))
        },
        |item| match item {
            Some(item) => handler(item),
            None => Ok(()),
        },
    )
}

/// Read-only dataset over records already in the store.
pub struct StoredDataset {
    description: Description,
    store: Arc<dyn BlobStore>,
    registry: Arc<TypeRegistry>,
}

impl StoredDataset {
    pub fn new(description: Description, store: Arc<dyn BlobStore>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            description,
            store,
            registry,
        }
    }
}

impl Dataset for StoredDataset {
    fn description(&self) -> Description {
        self.description.clone()
    }

    fn extract(
        &self,
        _cancel: &CancelToken,
        _fetcher: &Fetcher,
        _stats: &ExtractionStats,
        _options: &[UpdateOption],
    ) -> anyhow::Result<()> {
        anyhow::bail!("{} is read-only", self.description)
    }

    fn iter_items(
        &self,
        cancel: &CancelToken,
        handler: &ItemHandler<'_>,
        options: &[IterOption],
    ) -> Result<(), IterError> {
        iter_stored_items(
            cancel,
            self.store.as_ref(),
            &self.registry,
            &self.description,
            handler,
            &IterOptions::resolve(options)?,
        )
    }
}
