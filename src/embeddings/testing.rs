// In-process embedding provider for unit tests

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::cache::normalize::normalize;
use crate::{CacheError, Result};

pub const DIMENSION: usize = 4;

/// Returns fixed vectors for known texts and a far-away hashed vector for
/// anything else. Counts calls and can be made to fail or stall.
#[derive(Debug, Default)]
pub struct FakeEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.set_vector(text, vector);
        self
    }

    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors
            .lock()
            .expect("vector map lock")
            .insert(normalize(text), vector);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed_vector(text: &str) -> Vec<f32> {
        Sha256::digest(text.as_bytes())
            .iter()
            .take(DIMENSION)
            .map(|b| 100.0 + f32::from(*b))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Embedding("embedding service unavailable".to_string()));
        }

        let key = normalize(text);
        let known = self
            .vectors
            .lock()
            .expect("vector map lock")
            .get(&key)
            .cloned();
        Ok(known.unwrap_or_else(|| Self::hashed_vector(&key)))
    }

    fn model(&self) -> &str {
        "fake-embedder"
    }
}
