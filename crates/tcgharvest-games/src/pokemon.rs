//! Pokémon TCG payloads

use serde::{Deserialize, Serialize};

use crate::registry::{RegistryError, TypeRegistry, TypedPayload};
use crate::yugioh::RoundResult;

pub const GAME: &str = "pokemon";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PokemonDeck {
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
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub round_results: Vec<RoundResult>,
}

impl TypedPayload for PokemonDeck {
    const TYPE: &'static str = "PokemonDeck";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PokemonSet {
    pub name: String,
    pub code: String,
    pub series: String,
}

impl TypedPayload for PokemonSet {
    const TYPE: &'static str = "PokemonSet";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PokemonBinder {
    pub name: String,
    pub description: String,
}

impl TypedPayload for PokemonBinder {
    const TYPE: &'static str = "PokemonBinder";
}

pub fn register(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
    registry.register::<PokemonDeck>()?;
    registry.register::<PokemonSet>()?;
    registry.register::<PokemonBinder>()
}
