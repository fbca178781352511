// Offline maintenance of the ledger and vector index
// Deduplication under the current normalization, index rebuilds and legacy imports

#[cfg(test)]
mod tests;

pub mod consistency;

pub use consistency::{ConsistencyReport, check_consistency};

use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::cache::normalize::{display_form, normalize, question_id};
use crate::database::{IndexedVector, Ledger, QuestionRecord, VectorIndex};
use crate::embeddings::EmbeddingProvider;
use crate::{CacheError, Result};

/// Records after deduplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub records: Vec<QuestionRecord>,
    /// Number of records folded into another one
    pub merged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RebuildReport {
    pub questions_before: usize,
    pub questions_after: usize,
    pub merged: usize,
    pub indexed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportReport {
    /// Entries read from the legacy file
    pub imported: usize,
    pub rebuild: RebuildReport,
}

/// Entry of a legacy JSON ledger, keyed by an id from an older hash scheme
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    question: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default = "default_legacy_count")]
    count: i64,
}

const fn default_legacy_count() -> i64 {
    1
}

/// Re-derive every id from the current normalization and merge collisions.
///
/// A merged record keeps the highest observation count, the most recently
/// updated non-empty answer, the earliest creation time and the display
/// text of its oldest member. Output is ordered oldest first.
pub fn deduplicate(records: Vec<QuestionRecord>) -> DedupOutcome {
    let total = records.len();
    let mut groups: HashMap<String, Vec<QuestionRecord>> = HashMap::new();
    for record in records {
        groups
            .entry(question_id(&record.question))
            .or_default()
            .push(record);
    }

    let mut merged_records: Vec<QuestionRecord> = groups
        .into_iter()
        .filter_map(|(id, mut group)| {
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            merge_group(id, group)
        })
        .collect();

    merged_records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let merged = total - merged_records.len();
    if merged > 0 {
        debug!("Deduplication folded {} records", merged);
    }

    DedupOutcome {
        records: merged_records,
        merged,
    }
}

fn merge_group(id: String, group: Vec<QuestionRecord>) -> Option<QuestionRecord> {
    let oldest = group.first()?;

    let observation_count = group.iter().map(|r| r.observation_count).max()?;
    let created_at = group.iter().map(|r| r.created_at).min()?;
    let updated_at = group.iter().map(|r| r.updated_at).max()?;
    let answer = group
        .iter()
        .filter(|r| r.answer.as_deref().is_some_and(|a| !a.trim().is_empty()))
        .max_by_key(|r| r.updated_at)
        .and_then(|r| r.answer.clone());

    Some(QuestionRecord {
        id,
        question: display_form(&oldest.question),
        answer,
        observation_count: observation_count.max(1),
        created_at,
        updated_at,
    })
}

/// Deduplicate the ledger, then rebuild the index from every record whose
/// count reached `promotion_threshold`, the same rule registration promotes by.
///
/// Every promoted question is embedded before either store is touched, so
/// an embedding failure leaves both unchanged. The ledger is rewritten
/// first; if the index write then fails, the previous index stays in place
/// and running the rebuild again brings it back in line with the ledger.
pub async fn rebuild(
    ledger: &mut Ledger,
    index: &mut VectorIndex,
    embedder: &dyn EmbeddingProvider,
    promotion_threshold: i64,
) -> Result<RebuildReport> {
    let records: Vec<QuestionRecord> = ledger.records().into_iter().cloned().collect();
    rebuild_from(records, ledger, index, embedder, promotion_threshold).await
}

async fn rebuild_from(
    records: Vec<QuestionRecord>,
    ledger: &mut Ledger,
    index: &mut VectorIndex,
    embedder: &dyn EmbeddingProvider,
    promotion_threshold: i64,
) -> Result<RebuildReport> {
    let questions_before = records.len();
    info!("Rebuilding cache from {} ledger records", questions_before);

    let DedupOutcome { records, merged } = deduplicate(records);

    let mut vectors = Vec::new();
    for record in records.iter().filter(|r| r.is_promoted(promotion_threshold)) {
        if !record.has_answer() {
            debug!(
                "Promoted question {:?} has no answer yet, queries will miss on it",
                record.question
            );
        }

        let embedding = embedder.embed(&normalize(&record.question)).await?;
        if embedding.is_empty() {
            return Err(CacheError::Embedding(format!(
                "Model {} returned an empty vector for {}",
                embedder.model(),
                record.id
            )));
        }
        vectors.push(IndexedVector::new(record.id.clone(), embedding));
    }

    let report = RebuildReport {
        questions_before,
        questions_after: records.len(),
        merged,
        indexed: vectors.len(),
    };

    ledger.replace_all(records).await?;
    index.rebuild(vectors).await?;
    if let Err(e) = index.optimize().await {
        warn!("Index optimization after rebuild failed: {}", e);
    }

    info!(
        "Rebuild complete: {} questions ({} merged), {} indexed",
        report.questions_after, report.merged, report.indexed
    );
    Ok(report)
}

/// Merge a legacy `{id: {question, answer, count}}` JSON ledger into the
/// current one, then rebuild. Legacy ids are discarded and re-derived.
pub async fn import_legacy(
    path: &Path,
    ledger: &mut Ledger,
    index: &mut VectorIndex,
    embedder: &dyn EmbeddingProvider,
    promotion_threshold: i64,
) -> Result<ImportReport> {
    let legacy = read_legacy(path)?;
    let imported = legacy.len();
    info!("Importing {} legacy entries from {:?}", imported, path);

    let mut records: Vec<QuestionRecord> = ledger.records().into_iter().cloned().collect();
    for (legacy_id, entry) in legacy {
        if normalize(&entry.question).is_empty() {
            warn!("Skipping legacy entry {} with an empty question", legacy_id);
            continue;
        }

        let mut record = QuestionRecord::new(&entry.question, entry.answer.as_deref().unwrap_or(""));
        record.observation_count = entry.count.max(1);
        records.push(record);
    }

    let rebuild = rebuild_from(records, ledger, index, embedder, promotion_threshold).await?;
    Ok(ImportReport { imported, rebuild })
}

fn read_legacy(path: &Path) -> Result<BTreeMap<String, LegacyEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read legacy ledger {}", path.display()))?;

    let entries = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse legacy ledger {}", path.display()))?;

    Ok(entries)
}
