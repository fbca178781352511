// LanceDB vector database module
// Stores promoted question embeddings and answers nearest-neighbor queries

#[cfg(test)]
mod tests;

pub mod vector_store;

use serde::{Deserialize, Serialize};

pub use vector_store::VectorIndex;

/// A question embedding stored in LanceDB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    /// Id of the ledger record this vector belongs to
    pub id: String,
    /// The embedding of the normalized question
    pub vector: Vec<f32>,
    /// Timestamp when this vector was indexed
    pub created_at: String,
}

impl IndexedVector {
    #[inline]
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One nearest-neighbor hit; smaller distance means more similar
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}
