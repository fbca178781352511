use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{Lookup, Registration, SemanticCache};
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::CacheError;

/// Open the cache with the configured Ollama model as embedding provider
#[inline]
pub async fn open_cache(config: &Config) -> Result<SemanticCache> {
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;

    SemanticCache::open(config, Arc::new(client))
        .await
        .with_context(|| {
            format!(
                "Failed to open semantic cache in {}",
                config.get_base_dir().display()
            )
        })
}

/// Write the configuration file if it does not exist yet
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let path = config.config_file_path();
    if path.exists() {
        println!("Configuration already exists: {}", path.display());
        println!("Use 'qa-cache config --show' to print it.");
        return Ok(());
    }

    config.save()?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Look up a cached answer. Embedding failures are reported as a miss.
#[inline]
pub async fn query_question(config: &Config, question: &str) -> Result<()> {
    let cache = open_cache(config).await?;

    match cache.query(question).await {
        Ok(Lookup::Hit(hit)) => {
            info!("Cache hit for {:?}", hit.question);
            println!("{}", hit.answer);
            println!();
            println!(
                "(matched {:?} at distance {:.4}, seen {} times)",
                hit.question, hit.distance, hit.observation_count
            );
        }
        Ok(Lookup::Miss) => println!("miss"),
        Err(e @ (CacheError::Embedding(_) | CacheError::Cancelled(_))) => {
            warn!("Embedding failed, treating as miss: {}", e);
            println!("miss");
        }
        Err(e) => return Err(e).context("Cache query failed"),
    }

    Ok(())
}

#[inline]
pub async fn register_answer(config: &Config, question: &str, answer: &str) -> Result<()> {
    let cache = open_cache(config).await?;

    let registration = cache
        .register(question, answer)
        .await
        .context("Failed to register answer")?;

    match registration {
        Registration::Recorded { record, promoted } => {
            println!(
                "Recorded: {} (ID: {})",
                record.question,
                short_id(&record.id)
            );
            println!("  Observations: {}", record.observation_count);
            if promoted {
                println!("  Promoted into the vector index");
            } else if record.observation_count < cache.settings().promotion_threshold {
                println!(
                    "  Searchable after {} observations",
                    cache.settings().promotion_threshold
                );
            }
        }
        Registration::NearDuplicate {
            duplicate_of,
            distance,
            ..
        } => {
            println!(
                "Skipped: near duplicate of {} (distance {:.4})",
                short_id(&duplicate_of),
                distance
            );
        }
    }

    Ok(())
}

/// Exact ledger lookup, including questions not yet promoted
#[inline]
pub async fn lookup_question(config: &Config, question: &str) -> Result<()> {
    let cache = open_cache(config).await?;

    let Some(record) = cache.lookup(question).await else {
        println!("Question not found in the ledger.");
        return Ok(());
    };

    let promoted = record.is_promoted(cache.settings().promotion_threshold);
    println!("{} (ID: {})", record.question, short_id(&record.id));
    println!("  Observations: {}", record.observation_count);
    println!("  Promoted: {}", if promoted { "yes" } else { "no" });
    println!(
        "  First seen: {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    match record.answer {
        Some(answer) => println!("  Answer: {}", answer),
        None => println!("  Answer: (none)"),
    }

    Ok(())
}

/// Print the nearest indexed questions and what the acceptance gate decides
#[inline]
pub async fn similar_questions(config: &Config, question: &str, k: usize) -> Result<()> {
    let cache = open_cache(config).await?;

    let neighbors = cache
        .similar(question, k)
        .await
        .context("Similarity search failed")?;

    if neighbors.is_empty() {
        println!("No indexed questions yet.");
        return Ok(());
    }

    println!(
        "Nearest questions (threshold {:.4}):",
        cache.settings().distance_threshold
    );
    for (rank, neighbor) in neighbors.iter().enumerate() {
        let text = neighbor.question.as_deref().unwrap_or("<missing from ledger>");
        println!(
            "{:>3}. {:.4}  {:?}  {}",
            rank + 1,
            neighbor.distance,
            neighbor.decision,
            text
        );
    }

    Ok(())
}

#[inline]
pub async fn list_questions(config: &Config) -> Result<()> {
    let cache = open_cache(config).await?;
    let records = cache.records().await;

    if records.is_empty() {
        println!("The ledger is empty.");
        println!("Use 'qa-cache register <question> <answer>' to add one.");
        return Ok(());
    }

    let threshold = cache.settings().promotion_threshold;
    println!("Questions ({} total):", records.len());
    println!();

    for record in &records {
        let marker = if record.is_promoted(threshold) { "*" } else { " " };
        println!(
            "{} {:>4}  {}  {}",
            marker,
            record.observation_count,
            short_id(&record.id),
            record.question
        );
    }

    println!();
    println!("* searchable (seen at least {} times)", threshold);
    Ok(())
}

#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("QA Cache Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("Storage:");
    println!("   Base directory: {}", config.get_base_dir().display());

    match open_cache(config).await {
        Ok(cache) => {
            let stats = cache.stats().await;
            println!("   Ledger: {} questions", stats.questions);
            println!("   Answered: {}", stats.answered);
            println!("   Promoted: {}", stats.promoted);
            println!("   Indexed vectors: {}", stats.indexed);
            match stats.dimension {
                Some(dimension) => println!("   Vector dimension: {}", dimension),
                None => println!("   Vector dimension: (no vectors yet)"),
            }
        }
        Err(e) => println!("   Failed to open cache - {:#}", e),
    }
    println!();

    println!("Ollama:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!("   Connected ({})", client.base_url());
                println!("   Model: {}", config.ollama.model);
            }
            Err(e) => println!("   Connected but unhealthy - {:#}", e),
        },
        Err(e) => println!("   Failed to connect - {:#}", e),
    }

    Ok(())
}

#[inline]
pub async fn check_consistency(config: &Config) -> Result<()> {
    let cache = open_cache(config).await?;
    let report = cache
        .check_consistency()
        .await
        .context("Consistency check failed")?;

    println!("{}", report.summary());
    print_ids("Promoted but not indexed", &report.missing_from_index);
    print_ids("Indexed without ledger record", &report.orphaned_in_index);
    print_ids("Indexed more than once", &report.duplicate_index_entries);
    print_ids("Indexed without answer", &report.unanswered_in_index);
    print_ids("Stale ids", &report.stale_ids);

    if !report.is_consistent {
        println!();
        println!("Run 'qa-cache rebuild' to repair.");
    }
    Ok(())
}

#[inline]
pub async fn rebuild_cache(config: &Config) -> Result<()> {
    let cache = open_cache(config).await?;
    let report = cache.rebuild().await.context("Rebuild failed")?;

    println!("Rebuild completed successfully!");
    println!("  Questions before: {}", report.questions_before);
    println!("  Questions after: {}", report.questions_after);
    println!("  Merged duplicates: {}", report.merged);
    println!("  Indexed vectors: {}", report.indexed);
    Ok(())
}

#[inline]
pub async fn import_legacy_ledger(config: &Config, path: &Path) -> Result<()> {
    let cache = open_cache(config).await?;
    let report = cache
        .import_legacy(path)
        .await
        .with_context(|| format!("Failed to import {}", path.display()))?;

    println!("Imported {} legacy entries", report.imported);
    println!("  Questions: {}", report.rebuild.questions_after);
    println!("  Merged duplicates: {}", report.rebuild.merged);
    println!("  Indexed vectors: {}", report.rebuild.indexed);
    Ok(())
}

fn print_ids(label: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    println!("  {} ({}):", label, ids.len());
    for id in ids {
        println!("    {}", id);
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
