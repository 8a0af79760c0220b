//! Yu-Gi-Oh! payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{RegistryError, TypeRegistry, TypedPayload};

pub const GAME: &str = "yugioh";

/// One round of a tournament run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundResult {
    pub round_number: u32,
    pub opponent: String,
    pub opponent_deck: String,
    /// `W`, `L` or `D`
    pub result: String,
    pub game_wins: u32,
    pub game_losses: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YgoDeck {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_size: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub round_results: Vec<RoundResult>,
}

impl TypedPayload for YgoDeck {
    const TYPE: &'static str = "YGODeck";
}

/// Card pool that is not a playable deck (sets, binders).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YgoCollection {
    pub name: String,
    pub description: String,
}

impl TypedPayload for YgoCollection {
    const TYPE: &'static str = "YGOCollection";
}

pub fn register(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
    registry.register::<YgoDeck>()?;
    registry.register::<YgoCollection>()
}
