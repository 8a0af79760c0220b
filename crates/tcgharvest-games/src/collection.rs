//! Canonical collection model and its invariants

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{CollectionTypeWrapper, RegistryError, TypeRegistry};

/// Lowest and highest copy count accepted for one card entry.
pub const MIN_CARD_COUNT: i64 = 1;
pub const MAX_CARD_COUNT: i64 = 100;

/// `0001-01-01T00:00:00Z` as a Unix timestamp; zero time in older records.
const ZERO_TIME_UNIX: i64 = -62_135_596_800;

/// N copies of a named card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDesc {
    pub name: String,
    pub count: i64,
}

impl CardDesc {
    pub fn new(name: impl Into<String>, count: i64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Named group of cards (Main, Sideboard, Extra Deck, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub cards: Vec<CardDesc>,
}

impl Partition {
    pub fn new(name: impl Into<String>, cards: Vec<CardDesc>) -> Self {
        Self {
            name: name.into(),
            cards,
        }
    }
}

/// One deck, set or cube harvested from one source.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: CollectionTypeWrapper,
    pub release_date: DateTime<Utc>,
    pub partitions: Vec<Partition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When the harvester wrote this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

/// Wire shape before the payload is resolved through the registry.
#[derive(Deserialize)]
struct RawCollection {
    id: String,
    url: String,
    #[serde(rename = "type")]
    kind: RawType,
    release_date: DateTime<Utc>,
    #[serde(default)]
    partitions: Vec<Partition>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    extracted_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawType {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    inner: serde_json::Value,
}

#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    Type(RegistryError),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid collection json: {e}"),
            Self::Type(e) => write!(f, "collection type: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Type(e) => Some(e),
        }
    }
}

/// Violation found by [`Collection::canonicalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalizeError {
    EmptyId,
    EmptyUrl,
    InvalidUrl { url: String, reason: String },
    TypeMismatch { wrapper: String, payload: String },
    ZeroReleaseDate,
    NoPartitions,
    EmptyPartitionName { index: usize },
    EmptyPartition { partition: String },
    InvalidCount { partition: String, card: String, count: i64 },
    BadCardName { partition: String, name: String },
    DuplicateCard { partition: String, name: String },
}

impl std::fmt::Display for CanonicalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => f.write_str("empty id"),
            Self::EmptyUrl => f.write_str("url is empty"),
            Self::InvalidUrl { url, reason } => write!(f, "failed to parse url {url:?}: {reason}"),
            Self::TypeMismatch { wrapper, payload } => write!(
                f,
                "type mismatch: wrapper says {wrapper:?} but payload is {payload:?}"
            ),
            Self::ZeroReleaseDate => f.write_str("release date is zero time"),
            Self::NoPartitions => f.write_str("collection has no partitions"),
            Self::EmptyPartitionName { index } => write!(f, "partition {index} has empty name"),
            Self::EmptyPartition { partition } => {
                write!(f, "partition {partition:?} has no cards")
            }
            Self::InvalidCount {
                partition,
                card,
                count,
            } => write!(
                f,
                "invalid count {count} for card {card:?} in partition {partition:?}"
            ),
            Self::BadCardName { partition, name } => {
                write!(f, "bad card name {name:?} in partition {partition:?}")
            }
            Self::DuplicateCard { partition, name } => {
                write!(f, "duplicate card {name:?} in partition {partition:?}")
            }
        }
    }
}

impl std::error::Error for CanonicalizeError {}

impl CanonicalizeError {
    /// Stable label used to aggregate validation failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyId => "empty_id",
            Self::EmptyUrl => "empty_url",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::ZeroReleaseDate => "zero_release_date",
            Self::NoPartitions => "no_partitions",
            Self::EmptyPartitionName { .. } => "empty_partition_name",
            Self::EmptyPartition { .. } => "empty_partition",
            Self::InvalidCount { .. } => "invalid_count",
            Self::BadCardName { .. } => "bad_card_name",
            Self::DuplicateCard { .. } => "duplicate_card",
        }
    }
}

fn is_zero_time(t: &DateTime<Utc>) -> bool {
    let secs = t.timestamp();
    t.timestamp_subsec_nanos() == 0 && (secs == 0 || secs == ZERO_TIME_UNIX)
}

/// Blank, whitespace-only, or containing control characters.
pub fn is_bad_card_name(name: &str) -> bool {
    name.trim().is_empty() || name.chars().any(char::is_control)
}

impl Collection {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        kind: CollectionTypeWrapper,
        release_date: DateTime<Utc>,
        partitions: Vec<Partition>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            kind,
            release_date,
            partitions,
            source: None,
            extracted_at: None,
        }
    }

    /// Decode a stored record, resolving its payload through `registry`.
    pub fn from_json(bytes: &[u8], registry: &TypeRegistry) -> Result<Self, DecodeError> {
        let raw: RawCollection = serde_json::from_slice(bytes).map_err(DecodeError::Json)?;
        let kind = registry
            .decode(&raw.kind.type_name, raw.kind.inner)
            .map_err(DecodeError::Type)?;
        Ok(Self {
            id: raw.id,
            url: raw.url,
            kind,
            release_date: raw.release_date,
            partitions: raw.partitions,
            source: raw.source,
            extracted_at: raw.extracted_at,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Check every invariant, then sort partitions and their cards by name.
    ///
    /// Nothing is mutated when validation fails. Sorting is stable, so a
    /// second call is a no-op.
    pub fn canonicalize(&mut self) -> Result<(), CanonicalizeError> {
        self.validate()?;
        self.partitions.sort_by(|a, b| a.name.cmp(&b.name));
        for p in &mut self.partitions {
            p.cards.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CanonicalizeError> {
        if self.id.is_empty() {
            return Err(CanonicalizeError::EmptyId);
        }
        if self.url.is_empty() {
            return Err(CanonicalizeError::EmptyUrl);
        }
        if let Err(e) = url::Url::parse(&self.url) {
            return Err(CanonicalizeError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            });
        }
        let payload = self.kind.inner.type_name();
        if self.kind.type_name != payload {
            return Err(CanonicalizeError::TypeMismatch {
                wrapper: self.kind.type_name.clone(),
                payload: payload.to_string(),
            });
        }
        if is_zero_time(&self.release_date) {
            return Err(CanonicalizeError::ZeroReleaseDate);
        }
        if self.partitions.is_empty() {
            return Err(CanonicalizeError::NoPartitions);
        }

        for (index, partition) in self.partitions.iter().enumerate() {
            if partition.name.trim().is_empty() {
                return Err(CanonicalizeError::EmptyPartitionName { index });
            }
            if partition.cards.is_empty() {
                return Err(CanonicalizeError::EmptyPartition {
                    partition: partition.name.clone(),
                });
            }
            let mut seen = HashSet::with_capacity(partition.cards.len());
            for card in &partition.cards {
                if !(MIN_CARD_COUNT..=MAX_CARD_COUNT).contains(&card.count) {
                    return Err(CanonicalizeError::InvalidCount {
                        partition: partition.name.clone(),
                        card: card.name.clone(),
                        count: card.count,
                    });
                }
                if is_bad_card_name(&card.name) {
                    return Err(CanonicalizeError::BadCardName {
                        partition: partition.name.clone(),
                        name: card.name.clone(),
                    });
                }
                if !seen.insert(card.name.to_lowercase()) {
                    return Err(CanonicalizeError::DuplicateCard {
                        partition: partition.name.clone(),
                        name: card.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Partition by name.
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Total card copies across partitions.
    pub fn card_count(&self) -> i64 {
        self.partitions
            .iter()
            .flat_map(|p| &p.cards)
            .map(|c| c.count)
            .sum()
    }

    /// Timestamp used for freshness: when written, else when released.
    pub fn freshness_time(&self) -> DateTime<Utc> {
        self.extracted_at.unwrap_or(self.release_date)
    }
}
