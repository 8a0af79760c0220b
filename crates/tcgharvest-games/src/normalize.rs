//! Card-name normalization applied before canonicalization
//!
//! Sites disagree on typography ("Jace’s", "Jace's") and whitespace. Names
//! are folded to one spelling so the same card aggregates under one key.

use crate::collection::Collection;

/// Fold typographic punctuation, strip control characters, collapse whitespace.
pub fn normalize_card_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' | '`' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{00A0}' => ' ',
            c => c,
        };
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// Normalize every card name in place, dropping entries left empty.
///
/// Returns whether anything changed.
pub fn normalize_collection(collection: &mut Collection) -> bool {
    let mut changed = false;
    for partition in &mut collection.partitions {
        let before = partition.cards.len();
        for card in &mut partition.cards {
            let normalized = normalize_card_name(&card.name);
            if normalized != card.name {
                card.name = normalized;
                changed = true;
            }
        }
        partition.cards.retain(|c| !c.name.is_empty());
        changed |= partition.cards.len() != before;
    }
    changed
}
