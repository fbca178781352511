// Semantic cache controller
// Decides whether a question can be answered from a previously stored answer


pub mod gate;
pub mod keywords;
pub mod normalize;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, Config};
use crate::database::{IndexedVector, Ledger, QuestionRecord, VectorIndex};
use crate::embeddings::EmbeddingProvider;
use crate::maintenance::{self, ConsistencyReport, ImportReport, RebuildReport};
use crate::{CacheError, Result};

pub use gate::{AcceptanceGate, GateDecision};
pub use normalize::{normalize, question_id};

/// A stored answer served for an incoming question
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub id: String,
    /// The stored question the incoming one matched
    pub question: String,
    pub answer: String,
    pub distance: f32,
    pub observation_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(CacheHit),
    Miss,
}

impl Lookup {
    #[inline]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    #[inline]
    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Hit(hit) => Some(&hit.answer),
            Self::Miss => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The ledger now holds this record; `promoted` is true when this call
    /// made it searchable.
    Recorded {
        record: QuestionRecord,
        promoted: bool,
    },
    /// Not recorded: a different, already searchable question is this close
    NearDuplicate {
        id: String,
        duplicate_of: String,
        distance: f32,
    },
}

impl Registration {
    #[inline]
    pub fn promoted(&self) -> bool {
        matches!(self, Self::Recorded { promoted: true, .. })
    }

    #[inline]
    pub fn observation_count(&self) -> Option<i64> {
        match self {
            Self::Recorded { record, .. } => Some(record.observation_count),
            Self::NearDuplicate { .. } => None,
        }
    }
}

/// One entry of a similarity listing, before any acceptance rule is applied
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarQuestion {
    pub id: String,
    pub question: Option<String>,
    pub distance: f32,
    pub decision: GateDecision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub questions: usize,
    pub answered: usize,
    pub promoted: usize,
    pub indexed: usize,
    pub dimension: Option<usize>,
    pub model: String,
}

/// Semantic answer cache over a question ledger and a vector index.
///
/// Searches share the index read lock. Every ledger mutation runs under the
/// ledger mutex, and index writes are taken while holding it, so a
/// registration's upsert, promotion and persistence happen as one unit.
/// Locks are always acquired ledger first, index second.
#[derive(Debug)]
pub struct SemanticCache {
    ledger: Mutex<Ledger>,
    index: RwLock<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: CacheConfig,
    gate: AcceptanceGate,
}

impl SemanticCache {
    /// Open the ledger and index under the configured base directory
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        let ledger = Ledger::open(&config.ledger_path()).await?;
        let index = VectorIndex::open(&config.vector_index_path()).await?;

        Self::new(ledger, index, embedder, config.cache.clone())
    }

    #[inline]
    pub fn new(
        ledger: Ledger,
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: CacheConfig,
    ) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        Ok(Self {
            ledger: Mutex::new(ledger),
            index: RwLock::new(index),
            embedder,
            gate: AcceptanceGate::from(&settings),
            settings,
        })
    }

    #[inline]
    pub fn settings(&self) -> &CacheConfig {
        &self.settings
    }

    /// Look for a stored answer to `question`.
    ///
    /// Embedding failures are returned to the caller, who decides whether to
    /// treat them as a miss. The configured embedding timeout applies.
    pub async fn query(&self, question: &str) -> Result<Lookup> {
        self.query_inner(question, self.settings.embed_timeout())
            .await
    }

    /// [`query`](Self::query) with an explicit bound on the embedding call.
    /// On expiry returns [`CacheError::Cancelled`] without writing anything.
    pub async fn query_with_timeout(&self, question: &str, timeout: Duration) -> Result<Lookup> {
        self.query_inner(question, Some(timeout)).await
    }

    async fn query_inner(&self, question: &str, timeout: Option<Duration>) -> Result<Lookup> {
        let normalized = normalize(question);
        if normalized.is_empty() {
            debug!("Empty question, nothing to look up");
            return Ok(Lookup::Miss);
        }

        if self.index.read().await.is_empty() {
            debug!("Vector index is empty, skipping embedding");
            return Ok(Lookup::Miss);
        }

        let embedding = self.embed(&normalized, timeout).await?;

        let search = self.index.read().await.nearest_neighbors(&embedding, 1).await;
        let neighbor = match search {
            Ok(neighbors) => match neighbors.into_iter().next() {
                Some(neighbor) => neighbor,
                None => return Ok(Lookup::Miss),
            },
            Err(CacheError::InconsistentState(reason)) => {
                warn!("Vector search failed, treating as miss: {}", reason);
                return Ok(Lookup::Miss);
            }
            Err(e) => return Err(e),
        };

        let mut ledger = self.ledger.lock().await;

        let Some(candidate) = ledger.lookup(&neighbor.id) else {
            warn!(
                "Vector index references {} which is missing from the ledger",
                neighbor.id
            );
            return Ok(Lookup::Miss);
        };

        let decision = self
            .gate
            .evaluate(neighbor.distance, &candidate.question, &normalized);
        if !decision.is_accepted() {
            debug!(
                "Nearest question {:?} rejected ({:?}, distance {:.4})",
                candidate.question, decision, neighbor.distance
            );
            return Ok(Lookup::Miss);
        }

        if !candidate.has_answer() {
            warn!(
                "Indexed question {} has no stored answer, treating as miss",
                neighbor.id
            );
            return Ok(Lookup::Miss);
        }

        let record = ledger.record_hit(&neighbor.id).await?;
        let Some(answer) = record.answer else {
            return Err(CacheError::InconsistentState(format!(
                "Answer for {} disappeared during hit",
                record.id
            )));
        };

        debug!(
            "Cache hit for {:?} at distance {:.4}",
            record.question, neighbor.distance
        );
        Ok(Lookup::Hit(CacheHit {
            id: record.id,
            question: record.question,
            answer,
            distance: neighbor.distance,
            observation_count: record.observation_count,
        }))
    }

    /// Record a freshly computed answer for `question`.
    ///
    /// The question becomes searchable when its observation count reaches the
    /// promotion threshold. If promotion fails the ledger change is undone and
    /// the error returned.
    pub async fn register(&self, question: &str, answer: &str) -> Result<Registration> {
        let normalized = normalize(question);
        if normalized.is_empty() {
            return Err(CacheError::EmptyQuestion);
        }

        let mut ledger = self.ledger.lock().await;
        let id = question_id(&normalized);
        let mut embedding = None;

        if let Some(limit) = self.settings.near_duplicate_distance {
            if ledger.lookup(&id).is_none() && !self.index.read().await.is_empty() {
                let vector = self.embed(&normalized, self.settings.embed_timeout()).await?;
                let neighbors = self.index.read().await.nearest_neighbors(&vector, 1).await?;

                if let Some(neighbor) = neighbors.into_iter().next() {
                    if neighbor.id != id && neighbor.distance <= limit {
                        info!(
                            "Skipping registration of {:?}, near duplicate of {} (distance {:.4})",
                            normalized, neighbor.id, neighbor.distance
                        );
                        return Ok(Registration::NearDuplicate {
                            id,
                            duplicate_of: neighbor.id,
                            distance: neighbor.distance,
                        });
                    }
                }
                embedding = Some(vector);
            }
        }

        let upsert = ledger.upsert(question, answer).await?;
        if upsert.record.observation_count != self.settings.promotion_threshold {
            return Ok(Registration::Recorded {
                record: upsert.record,
                promoted: false,
            });
        }

        match self.promote(&upsert.record.id, &normalized, embedding).await {
            Ok(()) => {
                info!("Promoted question {:?} into the vector index", upsert.record.question);
                Ok(Registration::Recorded {
                    record: upsert.record,
                    promoted: true,
                })
            }
            Err(e) => {
                warn!("Promotion of {} failed, rolling back: {}", upsert.record.id, e);
                if let Err(rollback) = ledger.restore(upsert).await {
                    error!("Failed to roll back ledger after promotion failure: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn promote(&self, id: &str, normalized: &str, embedding: Option<Vec<f32>>) -> Result<()> {
        let vector = match embedding {
            Some(vector) => vector,
            None => self.embed(normalized, self.settings.embed_timeout()).await?,
        };

        self.index
            .write()
            .await
            .insert(IndexedVector::new(id, vector))
            .await
    }

    async fn embed(&self, text: &str, timeout: Option<Duration>) -> Result<Vec<f32>> {
        let embedding = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.embedder.embed(text))
                .await
                .map_err(|_| {
                    CacheError::Cancelled(format!("Embedding did not finish within {:?}", limit))
                })??,
            None => self.embedder.embed(text).await?,
        };

        if embedding.is_empty() {
            return Err(CacheError::Embedding(format!(
                "Model {} returned an empty vector",
                self.embedder.model()
            )));
        }

        Ok(embedding)
    }

    /// Direct ledger lookup by id, without any similarity search. Finds
    /// questions that are recorded but not yet searchable.
    pub async fn lookup(&self, question: &str) -> Option<QuestionRecord> {
        self.ledger
            .lock()
            .await
            .lookup(&question_id(question))
            .cloned()
    }

    /// The `k` nearest indexed questions with the decision the gate would take
    pub async fn similar(&self, question: &str, k: usize) -> Result<Vec<SimilarQuestion>> {
        let normalized = normalize(question);
        if normalized.is_empty() || self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.embed(&normalized, self.settings.embed_timeout()).await?;
        let neighbors = self.index.read().await.nearest_neighbors(&embedding, k).await?;

        let ledger = self.ledger.lock().await;
        Ok(neighbors
            .into_iter()
            .map(|neighbor| {
                let stored = ledger.lookup(&neighbor.id).map(|r| r.question.clone());
                let decision = match &stored {
                    Some(text) => self.gate.evaluate(neighbor.distance, text, &normalized),
                    None if self.gate.within_distance(neighbor.distance) => {
                        GateDecision::NoKeywordOverlap
                    }
                    None => GateDecision::TooFar,
                };
                SimilarQuestion {
                    id: neighbor.id,
                    question: stored,
                    distance: neighbor.distance,
                    decision,
                }
            })
            .collect())
    }

    pub async fn stats(&self) -> CacheStats {
        let ledger = self.ledger.lock().await;
        let index = self.index.read().await;
        let records = ledger.records();

        CacheStats {
            questions: records.len(),
            answered: records.iter().filter(|r| r.has_answer()).count(),
            promoted: records
                .iter()
                .filter(|r| r.is_promoted(self.settings.promotion_threshold))
                .count(),
            indexed: index.len(),
            dimension: index.dimension(),
            model: self.embedder.model().to_string(),
        }
    }

    /// Every ledger record, oldest first
    pub async fn records(&self) -> Vec<QuestionRecord> {
        self.ledger
            .lock()
            .await
            .records()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Compare ledger and index without changing either
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        let ledger = self.ledger.lock().await;
        let index = self.index.read().await;
        maintenance::check_consistency(&ledger, &index, self.settings.promotion_threshold).await
    }

    /// Deduplicate the ledger and rebuild the index from promoted records
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let mut ledger = self.ledger.lock().await;
        let mut index = self.index.write().await;
        maintenance::rebuild(
            &mut ledger,
            &mut index,
            self.embedder.as_ref(),
            self.settings.promotion_threshold,
        )
        .await
    }

    /// Merge a legacy JSON ledger, then rebuild
    pub async fn import_legacy(&self, path: &Path) -> Result<ImportReport> {
        let mut ledger = self.ledger.lock().await;
        let mut index = self.index.write().await;
        maintenance::import_legacy(
            path,
            &mut ledger,
            &mut index,
            self.embedder.as_ref(),
            self.settings.promotion_threshold,
        )
        .await
    }
}
