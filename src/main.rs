use anyhow::Result;
use clap::{Parser, Subcommand};
use qa_cache::commands::{
    check_consistency, import_legacy_ledger, init_config, list_questions, lookup_question,
    query_question, rebuild_cache, register_answer, show_status, similar_questions,
};
use qa_cache::config::{Config, get_config_dir, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "qa-cache")]
#[command(about = "A semantic answer cache backed by Ollama embeddings")]
#[command(version)]
struct Cli {
    /// Directory holding the configuration, ledger and vector index
    #[arg(long, global = true, env = "QA_CACHE_DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration, or show the current one
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Look up a cached answer for a question
    Query {
        question: String,
    },
    /// Record an answer computed for a question
    Register {
        question: String,
        answer: String,
    },
    /// Find a question in the ledger by exact normalized text
    Lookup {
        question: String,
    },
    /// List the nearest indexed questions with their distances
    Similar {
        question: String,
        /// Number of neighbors to show
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// List every question in the ledger
    List,
    /// Show cache statistics and Ollama health
    Status,
    /// Compare the ledger with the vector index
    Check,
    /// Deduplicate the ledger and rebuild the vector index
    Rebuild,
    /// Import a legacy JSON ledger, then rebuild
    Import {
        /// Path to the legacy qa_map.json
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                init_config(&config)?;
            }
        }
        Commands::Query { question } => {
            query_question(&config, &question).await?;
        }
        Commands::Register { question, answer } => {
            register_answer(&config, &question, &answer).await?;
        }
        Commands::Lookup { question } => {
            lookup_question(&config, &question).await?;
        }
        Commands::Similar { question, k } => {
            similar_questions(&config, &question, k).await?;
        }
        Commands::List => {
            list_questions(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Check => {
            check_consistency(&config).await?;
        }
        Commands::Rebuild => {
            rebuild_cache(&config).await?;
        }
        Commands::Import { path } => {
            import_legacy_ledger(&config, &path).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["qa-cache", "list"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::List));
        }
    }

    #[test]
    fn register_command_with_question_and_answer() {
        let cli = Cli::try_parse_from([
            "qa-cache",
            "register",
            "How do I make Tom Yum soup?",
            "Simmer lemongrass and galangal.",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Register { question, answer } = parsed.command {
                assert_eq!(question, "How do I make Tom Yum soup?");
                assert_eq!(answer, "Simmer lemongrass and galangal.");
            }
        }
    }

    #[test]
    fn register_requires_an_answer() {
        let cli = Cli::try_parse_from(["qa-cache", "register", "question only"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn similar_command_defaults() {
        let cli = Cli::try_parse_from(["qa-cache", "similar", "tom yum"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Similar { question, k } = parsed.command {
                assert_eq!(question, "tom yum");
                assert_eq!(k, 5);
            }
        }

        let cli = Cli::try_parse_from(["qa-cache", "similar", "tom yum", "-k", "10"]);
        if let Ok(parsed) = cli {
            if let Commands::Similar { k, .. } = parsed.command {
                assert_eq!(k, 10);
            }
        }
    }

    #[test]
    fn base_dir_is_global() {
        let cli = Cli::try_parse_from(["qa-cache", "status", "--base-dir", "/tmp/qa"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.base_dir, Some(PathBuf::from("/tmp/qa")));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["qa-cache", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["qa-cache", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["qa-cache", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
