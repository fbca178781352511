
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::cache::normalize::{display_form, question_id};

/// One question in the ledger, keyed by the hash of its normalized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuestionRecord {
    pub id: String,
    pub question: String,
    pub answer: Option<String>,
    pub observation_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl QuestionRecord {
    /// First observation of `question`. Blank answers are stored as absent.
    #[inline]
    pub fn new(question: &str, answer: &str) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: question_id(question),
            question: display_form(question),
            answer: non_blank(answer),
            observation_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The record after one more observation. The first stored answer wins;
    /// a later answer only fills a missing one.
    #[inline]
    pub fn observed_again(&self, answer: Option<&str>) -> Self {
        Self {
            answer: self
                .answer
                .clone()
                .or_else(|| answer.and_then(non_blank)),
            observation_count: self.observation_count + 1,
            updated_at: Utc::now().naive_utc(),
            ..self.clone()
        }
    }

    #[inline]
    pub fn has_answer(&self) -> bool {
        self.answer.is_some()
    }

    /// Whether the record has been seen often enough to be searchable
    #[inline]
    pub fn is_promoted(&self, promotion_threshold: i64) -> bool {
        self.observation_count >= promotion_threshold
    }
}

fn non_blank(answer: &str) -> Option<String> {
    (!answer.trim().is_empty()).then(|| answer.to_string())
}

/// Outcome of a ledger upsert, carrying what is needed to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub record: QuestionRecord,
    pub previous: Option<QuestionRecord>,
}
