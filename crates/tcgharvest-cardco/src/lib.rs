//! tcgharvest-cardco: Card co-occurrence graph over harvested collections
//!
//! Streams canonical collections from one or more datasets, counts how
//! often each pair of cards shares a partition, and writes the resulting
//! weighted pair table as CSV or JSON. Card records yield a per-card
//! attribute table alongside it.

pub mod export;
pub mod transform;

pub use export::{
    AttributeMap, CardAttributes, CooccurrencePair, CooccurrenceReport, ReportMetadata,
    ATTRIBUTES_CSV_HEADER, CSV_HEADER,
};
pub use transform::{accumulate_partition, merge, CooccurrenceTransform, PairCounts, PairKey, PairMap};
