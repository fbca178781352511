#[cfg(test)]
mod tests;

use sha2::{Digest, Sha256};

/// Trim and collapse whitespace, keeping the original casing for display
#[inline]
pub fn display_form(question: &str) -> String {
    question.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form used for ids, embeddings and keyword comparison
#[inline]
pub fn normalize(question: &str) -> String {
    display_form(question).to_lowercase()
}

/// Stable ledger id: hex SHA-256 of the normalized question
#[inline]
pub fn question_id(question: &str) -> String {
    hex::encode(Sha256::digest(normalize(question).as_bytes()))
}
