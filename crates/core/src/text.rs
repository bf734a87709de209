//! # Text Utilities
//!
//! Tokenization and set similarity shared by the attention scorer and
//! episodic recall.

use std::collections::HashSet;

/// Minimum characters for a word to count as a token
pub const MIN_TOKEN_CHARS: usize = 3;

/// Split text into a set of case-folded, punctuation-stripped tokens.
///
/// Words shorter than [`MIN_TOKEN_CHARS`] are dropped.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
        .map(|word| word.to_lowercase())
        .collect()
}

/// Jaccard similarity of two token sets.
///
/// Two empty sets are identical (similarity 1.0).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Fraction of `reference` tokens that also appear in `candidate`.
///
/// Returns `None` when the reference has no tokens.
pub fn overlap_ratio(candidate: &HashSet<String>, reference: &HashSet<String>) -> Option<f64> {
    if reference.is_empty() {
        return None;
    }
    let shared = reference.intersection(candidate).count();
    Some(shared as f64 / reference.len() as f64)
}
