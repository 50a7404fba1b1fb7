//! Kirana application binary - composition root.
//!
//! Ties the crates together into a single terminal assistant:
//! 1. Parse CLI args and load TOML configuration
//! 2. Open the session store (SQLite, or in-memory with --memory)
//! 3. Wire the demo capabilities (heuristic classifier, keyword extractor,
//!    catalog search, template answers) into the orchestrator
//! 4. Run a stdin REPL, one conversation session per run

mod cli;
mod demo;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use kirana_chat::{HeuristicClassifier, Orchestrator, SlotRegistry};
use kirana_core::config::KiranaConfig;
use kirana_store::{Database, MemorySessionStore, SessionStore, SqliteSessionStore};

use cli::CliArgs;
use demo::{CatalogSearch, KeywordExtractor, TemplateAnswerer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config first, so the log level can come from it.
    let config_file = args.resolve_config_path();
    let config = KiranaConfig::load_or_default(&config_file);

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Kirana v{}", env!("CARGO_PKG_VERSION"));

    // Session store.
    let store: Arc<dyn SessionStore> = if args.memory {
        tracing::info!("Using in-memory session store");
        Arc::new(MemorySessionStore::new(config.session.ttl_minutes))
    } else {
        let db_path = args.resolve_db_path(&config.store.db_path);
        let db = Arc::new(Database::new(&db_path)?);
        let store = SqliteSessionStore::new(db, config.session.ttl_minutes);
        // Reclaim space from conversations past their TTL.
        store.purge_expired()?;
        Arc::new(store)
    };

    // Demo capabilities in place of the LLM and the product index.
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(HeuristicClassifier),
        Arc::new(KeywordExtractor),
        Arc::new(CatalogSearch::with_builtin_catalog()),
        Arc::new(TemplateAnswerer),
        SlotRegistry::standard(),
        config.session.clone(),
        config.chat.clone(),
    );

    repl(&orchestrator).await
}

/// Single-user REPL: one session per run, turns processed in arrival order.
async fn repl(orchestrator: &Orchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let user_id = whoami();
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(%user_id, %session_id, "Conversation started");

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"kirana> what are you shopping for today? (\"quit\" to exit)\n")
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("quit") || message.eq_ignore_ascii_case("exit") {
            break;
        }

        match orchestrator.handle_turn(&user_id, &session_id, message).await {
            Ok(response) => {
                stdout
                    .write_all(format!("kirana> {}\n", response.text).as_bytes())
                    .await?;
                if !response.quick_replies.is_empty() {
                    stdout
                        .write_all(
                            format!("        [{}]\n", response.quick_replies.join(" | "))
                                .as_bytes(),
                        )
                        .await?;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Turn failed");
                stdout
                    .write_all(b"kirana> something went wrong, please try again\n")
                    .await?;
            }
        }
    }

    tracing::info!("Conversation ended");
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}
