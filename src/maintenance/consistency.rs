// Ledger/index consistency validation
// Finds drift between the SQLite ledger and the LanceDB vector index


use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::Result;
use crate::cache::normalize::question_id;
use crate::database::{Ledger, VectorIndex};

/// Consistency check results between the ledger and the vector index
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsistencyReport {
    /// Number of records in the ledger
    pub ledger_records: usize,
    /// Number of vectors in the index
    pub indexed_vectors: usize,
    /// Promoted record ids with no vector
    pub missing_from_index: Vec<String>,
    /// Vector ids with no ledger record
    pub orphaned_in_index: Vec<String>,
    /// Ids indexed more than once
    pub duplicate_index_entries: Vec<String>,
    /// Indexed ids whose ledger record has no answer yet. Queries miss on
    /// these; they do not make the cache inconsistent.
    pub unanswered_in_index: Vec<String>,
    /// Ledger ids that no longer match their question under current normalization
    pub stale_ids: Vec<String>,
    /// Overall consistency status
    pub is_consistent: bool,
}

/// Compare the ledger with the index without modifying either
pub async fn check_consistency(
    ledger: &Ledger,
    index: &VectorIndex,
    promotion_threshold: i64,
) -> Result<ConsistencyReport> {
    info!("Starting ledger/index consistency validation");

    let index_ids = index.list_ids().await?;
    debug!("Found {} vectors in the index", index_ids.len());

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for id in &index_ids {
        *occurrences.entry(id.as_str()).or_default() += 1;
    }
    let indexed: HashSet<&str> = occurrences.keys().copied().collect();

    let records = ledger.records();

    let mut missing_from_index: Vec<String> = records
        .iter()
        .filter(|r| r.is_promoted(promotion_threshold) && !indexed.contains(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect();

    let mut orphaned_in_index: Vec<String> = indexed
        .iter()
        .filter(|id| ledger.lookup(id).is_none())
        .map(|id| (*id).to_string())
        .collect();

    let mut duplicate_index_entries: Vec<String> = occurrences
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(id, _)| (*id).to_string())
        .collect();

    let mut unanswered_in_index: Vec<String> = indexed
        .iter()
        .filter_map(|id| ledger.lookup(id))
        .filter(|r| !r.has_answer())
        .map(|r| r.id.clone())
        .collect();

    let stale_ids: Vec<String> = records
        .iter()
        .filter(|r| question_id(&r.question) != r.id)
        .map(|r| r.id.clone())
        .collect();

    missing_from_index.sort();
    orphaned_in_index.sort();
    duplicate_index_entries.sort();
    unanswered_in_index.sort();

    let is_consistent = missing_from_index.is_empty()
        && orphaned_in_index.is_empty()
        && duplicate_index_entries.is_empty()
        && stale_ids.is_empty();

    let report = ConsistencyReport {
        ledger_records: records.len(),
        indexed_vectors: index_ids.len(),
        missing_from_index,
        orphaned_in_index,
        duplicate_index_entries,
        unanswered_in_index,
        stale_ids,
        is_consistent,
    };

    if report.is_consistent {
        info!("Consistency validation passed");
    } else {
        log_consistency_issues(&report);
    }

    if !report.unanswered_in_index.is_empty() {
        info!(
            "Found {} indexed questions without an answer",
            report.unanswered_in_index.len()
        );
    }

    Ok(report)
}

fn log_consistency_issues(report: &ConsistencyReport) {
    if !report.missing_from_index.is_empty() {
        warn!(
            "Found {} promoted questions missing from the index",
            report.missing_from_index.len()
        );
    }

    if !report.orphaned_in_index.is_empty() {
        warn!(
            "Found {} orphaned vectors in the index",
            report.orphaned_in_index.len()
        );
    }

    if !report.duplicate_index_entries.is_empty() {
        warn!(
            "Found {} questions indexed more than once",
            report.duplicate_index_entries.len()
        );
    }

    if !report.stale_ids.is_empty() {
        warn!(
            "Found {} ledger ids derived under an older normalization",
            report.stale_ids.len()
        );
    }
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Cache is consistent: {} questions in the ledger, {} vectors in the index",
                self.ledger_records, self.indexed_vectors
            )
        } else {
            format!(
                "Cache inconsistencies found: {} missing from index, {} orphaned in index, {} duplicated, {} stale ids",
                self.missing_from_index.len(),
                self.orphaned_in_index.len(),
                self.duplicate_index_entries.len(),
                self.stale_ids.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_from_index.len()
            + self.orphaned_in_index.len()
            + self.duplicate_index_entries.len()
            + self.stale_ids.len()
    }
}
