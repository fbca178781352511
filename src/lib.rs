use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Ledger is corrupt: {0}")]
    LedgerCorrupt(String),

    #[error("Inconsistent cache state: {0}")]
    InconsistentState(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Question is empty after normalization")]
    EmptyQuestion,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod maintenance;

pub use cache::{CacheHit, Lookup, Registration, SemanticCache};
