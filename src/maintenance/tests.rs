use super::*;
use crate::embeddings::testing::FakeEmbedder;
use chrono::{Duration, NaiveDateTime, Utc};
use tempfile::TempDir;

fn record_at(question: &str, answer: Option<&str>, count: i64, minutes_ago: i64) -> QuestionRecord {
    let at: NaiveDateTime = Utc::now().naive_utc() - Duration::minutes(minutes_ago);
    QuestionRecord {
        id: question_id(question),
        question: question.to_string(),
        answer: answer.map(str::to_string),
        observation_count: count,
        created_at: at,
        updated_at: at,
    }
}

async fn open_stores(temp_dir: &TempDir) -> anyhow::Result<(Ledger, VectorIndex)> {
    let ledger = Ledger::open(&temp_dir.path().join("ledger.db")).await?;
    let index = VectorIndex::open(&temp_dir.path().join("vectors")).await?;
    Ok((ledger, index))
}

#[test]
fn deduplicate_merges_records_with_the_same_normalized_text() {
    let mut legacy = record_at("How do I make Tom Yum soup?", Some("old answer"), 3, 30);
    // written under an older id scheme
    legacy.id = "d41d8cd98f00b204e9800998ecf8427e".to_string();
    let mut newer = record_at("  how do i make tom yum soup? ", Some("new answer"), 1, 10);
    newer.updated_at = Utc::now().naive_utc();
    let other = record_at("What is pad thai?", None, 1, 20);

    let outcome = deduplicate(vec![newer, other, legacy]);

    assert_eq!(outcome.merged, 1);
    assert_eq!(outcome.records.len(), 2);

    let merged = &outcome.records[0];
    assert_eq!(merged.id, question_id("how do i make tom yum soup?"));
    assert_eq!(merged.question, "How do I make Tom Yum soup?");
    assert_eq!(merged.observation_count, 3);
    assert_eq!(merged.answer.as_deref(), Some("new answer"));
    assert_eq!(outcome.records[1].question, "What is pad thai?");
}

#[test]
fn deduplicate_keeps_an_existing_answer_over_a_blank_one() {
    let answered = record_at("What is larb?", Some("A minced meat salad."), 2, 30);
    let mut blank = record_at("what is LARB?", Some("   "), 1, 5);
    blank.updated_at = Utc::now().naive_utc();

    let outcome = deduplicate(vec![answered, blank]);

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(
        outcome.records[0].answer.as_deref(),
        Some("A minced meat salad.")
    );
}

#[test]
fn deduplicate_without_collisions_is_identity() {
    let records = vec![
        record_at("first question", Some("a"), 1, 30),
        record_at("second question", Some("b"), 2, 20),
    ];

    let outcome = deduplicate(records.clone());
    assert_eq!(outcome.merged, 0);
    assert_eq!(outcome.records, records);
}

#[tokio::test]
async fn rebuild_indexes_every_promoted_record() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let (mut ledger, mut index) = open_stores(&temp_dir).await?;
    let embedder = FakeEmbedder::new();

    ledger.upsert("What is tom yum?", "A hot and sour soup.").await?;
    ledger.upsert("What is tom yum?", "").await?;
    ledger.upsert("What is pad thai?", "Stir-fried noodles.").await?;
    ledger.upsert("What is nam prik?", "").await?;
    ledger.upsert("What is nam prik?", "").await?;

    // a stale vector that must not survive
    index
        .insert(IndexedVector::new("orphan", vec![1.0, 2.0, 3.0, 4.0]))
        .await?;

    let report = rebuild(&mut ledger, &mut index, &embedder, 2).await?;

    assert_eq!(report.questions_before, 3);
    assert_eq!(report.questions_after, 3);
    assert_eq!(report.merged, 0);
    assert_eq!(report.indexed, 2);
    assert_eq!(embedder.calls(), 2);

    let mut ids = index.list_ids().await?;
    ids.sort();
    let mut expected = vec![question_id("what is tom yum?"), question_id("what is nam prik?")];
    expected.sort();
    assert_eq!(ids, expected);

    let consistency = check_consistency(&ledger, &index, 2).await?;
    assert!(consistency.is_consistent, "{}", consistency.summary());
    assert_eq!(
        consistency.unanswered_in_index,
        vec![question_id("what is nam prik?")]
    );

    Ok(())
}

#[tokio::test]
async fn repeated_rebuilds_stay_consistent() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let (mut ledger, mut index) = open_stores(&temp_dir).await?;
    let embedder = FakeEmbedder::new();

    ledger.upsert("What is larb?", "A minced meat salad.").await?;
    ledger.upsert("What is larb?", "").await?;

    let first = rebuild(&mut ledger, &mut index, &embedder, 2).await?;
    let second = rebuild(&mut ledger, &mut index, &embedder, 2).await?;

    assert_eq!(first, second);
    assert_eq!(index.len(), 1);
    assert!(check_consistency(&ledger, &index, 2).await?.is_consistent);

    Ok(())
}

#[tokio::test]
async fn failed_embedding_leaves_stores_untouched() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let (mut ledger, mut index) = open_stores(&temp_dir).await?;
    let embedder = FakeEmbedder::new();

    ledger.upsert("What is som tam?", "Papaya salad.").await?;
    ledger.upsert("What is som tam?", "").await?;
    index
        .insert(IndexedVector::new("orphan", vec![1.0, 2.0, 3.0, 4.0]))
        .await?;

    embedder.set_failing(true);
    let result = rebuild(&mut ledger, &mut index, &embedder, 2).await;

    assert!(matches!(result, Err(CacheError::Embedding(_))));
    assert_eq!(ledger.len(), 1);
    assert_eq!(index.list_ids().await?, vec!["orphan".to_string()]);

    Ok(())
}

#[tokio::test]
async fn import_legacy_merges_into_ledger() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let (mut ledger, mut index) = open_stores(&temp_dir).await?;
    let embedder = FakeEmbedder::new();

    ledger.upsert("What is khao soi?", "A curry noodle soup.").await?;

    let legacy_path = temp_dir.path().join("qa_map.json");
    std::fs::write(
        &legacy_path,
        r#"{
            "5d41402abc4b2a76b9719d911017c592": {
                "question": "What is Khao Soi?",
                "answer": "Northern Thai noodles.",
                "count": 4
            },
            "7d793037a0760186574b0282f2f435e7": {
                "question": "How spicy is som tam?",
                "answer": "Very.",
                "count": 1
            },
            "0cc175b9c0f1b6a831c399e269772661": {
                "question": "   ",
                "answer": "ignored",
                "count": 9
            }
        }"#,
    )?;

    let report = import_legacy(&legacy_path, &mut ledger, &mut index, &embedder, 2).await?;

    assert_eq!(report.imported, 3);
    assert_eq!(report.rebuild.questions_before, 3);
    assert_eq!(report.rebuild.questions_after, 2);
    assert_eq!(report.rebuild.merged, 1);
    assert_eq!(report.rebuild.indexed, 1);

    let khao_soi = ledger
        .lookup(&question_id("what is khao soi?"))
        .expect("merged record");
    assert_eq!(khao_soi.observation_count, 4);
    assert_eq!(khao_soi.question, "What is khao soi?");

    let som_tam = ledger
        .lookup(&question_id("how spicy is som tam?"))
        .expect("imported record");
    assert_eq!(som_tam.observation_count, 1);
    assert_eq!(som_tam.answer.as_deref(), Some("Very."));

    Ok(())
}

#[tokio::test]
async fn import_rejects_malformed_file() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let (mut ledger, mut index) = open_stores(&temp_dir).await?;
    let embedder = FakeEmbedder::new();

    let legacy_path = temp_dir.path().join("qa_map.json");
    std::fs::write(&legacy_path, "[1, 2, 3]")?;

    let result = import_legacy(&legacy_path, &mut ledger, &mut index, &embedder, 2).await;
    assert!(matches!(result, Err(CacheError::Other(_))));
    assert!(ledger.is_empty());

    Ok(())
}
