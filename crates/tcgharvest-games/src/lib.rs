//! tcgharvest-games: Canonical card-game collections and their harvesting
//!
//! The collection model and type registry, per-game payloads, the
//! extraction interface with its options and statistics, and the
//! discovery, deduplication and health bookkeeping around it.

pub mod card;
pub mod collection;
pub mod dataset;
pub mod dedup;
pub mod discovery;
pub mod harvest;
pub mod health;
pub mod magic;
pub mod normalize;
pub mod options;
pub mod pokemon;
pub mod registry;
pub mod stats;
pub mod yugioh;

// Re-exports for convenience
pub use card::{Card, CardError, CardFace};
pub use collection::{CanonicalizeError, CardDesc, Collection, DecodeError, Partition};
pub use dataset::{iter_stored_items, Dataset, Description, Item, ItemHandler, ItemKind, StoredDataset};
pub use dedup::{deck_signature, DedupOutcome, DedupTracker};
pub use discovery::{DiscoveryState, DiscoveryTracker};
pub use harvest::{Harvester, ListingSource, SourceContext};
pub use health::{HealthCheck, HealthMonitor, HealthStatus};
pub use normalize::{normalize_card_name, normalize_collection};
pub use options::{IterOption, IterOptions, OptionsError, UpdateOption, UpdateOptions};
pub use registry::{CollectionType, CollectionTypeWrapper, RegistryError, TypeRegistry, TypedPayload};
pub use stats::{categorize_error, ErrorCategory, ExtractionStats};

/// Register every game's payload types into `registry`.
pub fn register_all(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
    magic::register(registry)?;
    yugioh::register(registry)?;
    pokemon::register(registry)
}

/// Registry with every built-in payload type.
pub fn default_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    register_all(&mut registry).expect("built-in collection types have unique names");
    registry
}
