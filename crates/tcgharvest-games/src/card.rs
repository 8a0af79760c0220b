//! Card reference records
//!
//! Card datasets store one [`Card`] per name next to their collections,
//! under `{game}/{source}/cards/`. Consumers read them for per-card
//! attributes such as mana value and type line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardFace {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mana_cost: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub type_line: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oracle_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    /// Converted mana cost; 0 for games without one
    #[serde(default)]
    pub cmc: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faces: Vec<CardFace>,
}

#[derive(Debug)]
pub enum CardError {
    Json(serde_json::Error),
    EmptyName,
}

impl std::fmt::Display for CardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "failed to decode card: {e}"),
            Self::EmptyName => f.write_str("card record has an empty name"),
        }
    }
}

impl std::error::Error for CardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::EmptyName => None,
        }
    }
}

impl Card {
    pub fn new(name: impl Into<String>, cmc: f64, faces: Vec<CardFace>) -> Self {
        Self {
            name: name.into(),
            cmc,
            faces,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CardError> {
        let card: Self = serde_json::from_slice(bytes).map_err(CardError::Json)?;
        if card.name.trim().is_empty() {
            return Err(CardError::EmptyName);
        }
        Ok(card)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Type line of the front face.
    pub fn type_line(&self) -> &str {
        self.faces.first().map_or("", |f| f.type_line.as_str())
    }
}
