//! Magic: The Gathering payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{RegistryError, TypeRegistry, TypedPayload};

pub const GAME: &str = "magic";

/// Tournament or user deck.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deck {
    pub name: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<u32>,
    /// Free-form record as listed, e.g. `5-2-1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wins: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub losses: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ties: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
}

impl TypedPayload for Deck {
    const TYPE: &'static str = "Deck";
}

/// Printed card set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Set {
    pub name: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_type: Option<String>,
}

impl TypedPayload for Set {
    const TYPE: &'static str = "Set";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cube {
    pub name: String,
}

impl TypedPayload for Cube {
    const TYPE: &'static str = "Cube";
}

pub fn register(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
    registry.register::<Deck>()?;
    registry.register::<Set>()?;
    registry.register::<Cube>()
}
