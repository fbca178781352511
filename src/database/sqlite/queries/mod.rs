
use super::models::QuestionRecord;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

pub struct QuestionQueries;

impl QuestionQueries {
    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<QuestionRecord>> {
        let records = sqlx::query_as::<_, QuestionRecord>(
            r#"
            SELECT id,
                   question,
                   answer,
                   observation_count,
                   created_at,
                   updated_at
            FROM questions ORDER BY created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to list questions")?;

        Ok(records)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<QuestionRecord>> {
        let record = sqlx::query_as::<_, QuestionRecord>(
            r#"
            SELECT id,
                   question,
                   answer,
                   observation_count,
                   created_at,
                   updated_at
            FROM questions WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get question by id")?;

        Ok(record)
    }

    /// Insert the record, or overwrite the stored row with the same id
    #[inline]
    pub async fn save<'e, E>(executor: E, record: &QuestionRecord) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO questions (id, question, answer, observation_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                question = excluded.question,
                answer = excluded.answer,
                observation_count = excluded.observation_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(record.observation_count)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(executor)
        .await
        .with_context(|| format!("Failed to save question {}", record.id))?;

        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete question")?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically replace every stored row with `records`
    #[inline]
    pub async fn replace_all(pool: &SqlitePool, records: &[QuestionRecord]) -> Result<()> {
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin transaction for ledger rewrite")?;

        sqlx::query("DELETE FROM questions")
            .execute(&mut *tx)
            .await
            .context("Failed to clear questions")?;

        for record in records {
            Self::save(&mut *tx, record).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit ledger rewrite")?;

        debug!("Rewrote ledger with {} questions", records.len());
        Ok(())
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .fetch_one(pool)
            .await
            .context("Failed to count questions")?;

        Ok(count)
    }
}
