//! mnemo CLI
//!
//! Thin operator interface over the memory subsystem: record turns,
//! inspect sessions, search memories, and run maintenance.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnemo::assistant::Assistant;
use mnemo::embedding::{Embedder, TfIdfEmbedder};
use mnemo::error::Result;
use mnemo::retrieval::{FusionConfig, FusionEngine, MemoryCommitCoordinator, RetentionConfig};
use mnemo::session::{SessionConfig, SessionManager, SessionStore};
use mnemo::store::{SqliteLexicalStore, SqliteVectorStore};
use mnemo::summarize::ExtractiveSummarizer;
use mnemo::tokens::estimate_exchange_tokens;

const EMBEDDING_DIMENSIONS: usize = 384;

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Conversational memory subsystem CLI")]
#[command(version)]
struct Cli {
    /// Data directory holding the session, vector, and lexical databases
    #[arg(long, env = "MNEMO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one user/assistant exchange, settling session boundaries
    AddTurn {
        /// What the user said
        user: String,
        /// What the assistant answered
        assistant: String,
    },
    /// Print the current session's context window
    Context,
    /// Search long-term memories
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// End the active session and commit it to memory
    EndSession,
    /// Show statistics for the active session and the memory stores
    Stats,
    /// Prune the oldest memories beyond the retention limit
    Cleanup {
        /// How many recent memories to keep
        #[arg(short, long, default_value = "30")]
        keep: usize,
    },
    /// Rebuild the lexical index from the vector store
    RebuildIndex,
    /// Delete all long-term memories
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Interactive mode: record a conversation turn by turn
    Interactive,
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mnemo")
    })
}

fn open_assistant(dir: &PathBuf, keep_recent: usize) -> Result<Assistant> {
    let embedder: Arc<dyn Embedder> = Arc::new(TfIdfEmbedder::new(EMBEDDING_DIMENSIONS));
    let vector = Arc::new(SqliteVectorStore::open(dir.join("vectors.db"))?);
    let lexical = Arc::new(SqliteLexicalStore::open(dir.join("lexical.db"))?);
    let sessions = SessionStore::open(dir.join("sessions.db"))?;

    Ok(Assistant::new(
        SessionManager::new(sessions, SessionConfig::default()),
        FusionEngine::new(
            embedder.clone(),
            vector.clone(),
            lexical.clone(),
            FusionConfig::default(),
        ),
        MemoryCommitCoordinator::new(embedder, vector, lexical, RetentionConfig { keep_recent }),
        Arc::new(ExtractiveSummarizer),
    ))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dir = data_dir(&cli);

    match cli.command {
        Commands::AddTurn { user, assistant } => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            let ctx = a.prepare_turn(&user)?;
            let tokens = estimate_exchange_tokens(&user, &assistant) as i64;
            a.record_turn(&ctx.session_id, &user, &assistant, tokens)?;
            println!("Recorded in session {}", ctx.session_id);
            if !ctx.memories.is_empty() {
                println!("Relevant memories:");
                for memory in &ctx.memories {
                    println!(
                        "  ({:.4}) [{}] {}",
                        memory.fused_score,
                        memory.metadata.session_id,
                        truncate(&memory.text, 70)
                    );
                }
            }
        }

        Commands::Context => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            match a.manager().active_session()? {
                Some(session) => {
                    println!("Session: {}", session.session_id);
                    print!("{}", a.manager().session_context(&session.session_id)?);
                }
                None => println!("No active session"),
            }
        }

        Commands::Search { query, limit } => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            match a.fusion().retrieve(&query, limit) {
                Ok(results) if results.is_empty() => println!("No matching memories"),
                Ok(results) => {
                    for result in results {
                        let sources: Vec<String> =
                            result.sources.iter().map(|s| s.to_string()).collect();
                        println!(
                            "({:.4}) [{}] {}",
                            result.fused_score,
                            sources.join("+"),
                            truncate(&result.text, 70)
                        );
                    }
                }
                Err(e) => println!("{}", e.user_message()),
            }
        }

        Commands::EndSession => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            match a.manager().active_session()? {
                Some(session) => {
                    let snapshot = a.end_session(&session.session_id)?;
                    println!(
                        "Ended {} ({} exchanges)",
                        snapshot.session_id, snapshot.message_count
                    );
                    if let Some(summary) = snapshot.summary {
                        println!("Summary: {}", summary);
                    }
                }
                None => println!("No active session"),
            }
        }

        Commands::Stats => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            if let Some(session) = a.manager().active_session()? {
                let stats = a.manager().session_stats(&session.session_id)?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("No active session");
            }
            println!("Total sessions: {}", a.manager().store().session_count()?);
        }

        Commands::Cleanup { keep } => {
            let a = open_assistant(&dir, keep)?;
            let removed = a.coordinator().cleanup_old_summaries()?;
            println!("Removed {} old memories", removed);
        }

        Commands::RebuildIndex => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            let indexed = a.fusion().rebuild_lexical_index()?;
            println!("Reindexed {} memories", indexed);
        }

        Commands::Reset { yes } => {
            if !yes {
                println!("This deletes all long-term memories. Re-run with --yes to confirm.");
                return Ok(());
            }
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            a.coordinator().reset()?;
            println!("Memory stores reset");
        }

        Commands::Interactive => {
            let a = open_assistant(&dir, RetentionConfig::default().keep_recent)?;
            interactive(&a)?;
        }
    }

    Ok(())
}

/// Line-oriented conversation recorder. Any exit path (quit command,
/// end-of-input, or the terminal closing the pipe) runs through the
/// emergency save so the session is never left orphaned Active.
fn interactive(a: &Assistant) -> Result<()> {
    println!("mnemo interactive - type a user message, or /search <q>, /stats, /end, /quit");
    let stdin = io::stdin();

    loop {
        print!("user> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/stats" => match a.manager().active_session()? {
                Some(session) => {
                    let stats = a.manager().session_stats(&session.session_id)?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                None => println!("No active session"),
            },
            "/end" => match a.manager().active_session()? {
                Some(session) => {
                    let snapshot = a.end_session(&session.session_id)?;
                    println!(
                        "Ended {} ({} exchanges)",
                        snapshot.session_id, snapshot.message_count
                    );
                }
                None => println!("No active session"),
            },
            query if query.starts_with("/search ") => {
                match a.fusion().retrieve(&query[8..], 5) {
                    Ok(results) => {
                        for result in results {
                            println!(
                                "({:.4}) {}",
                                result.fused_score,
                                truncate(&result.text, 70)
                            );
                        }
                    }
                    Err(e) => println!("{}", e.user_message()),
                }
            }
            user => {
                let ctx = a.prepare_turn(user)?;
                for memory in &ctx.memories {
                    println!("  (remembering: {})", truncate(&memory.text, 60));
                }
                print!("assistant> ");
                io::stdout().flush()?;
                let mut reply = String::new();
                if stdin.read_line(&mut reply)? == 0 {
                    break;
                }
                let reply = reply.trim();
                if reply.is_empty() {
                    continue;
                }
                let tokens = estimate_exchange_tokens(user, reply) as i64;
                a.record_turn(&ctx.session_id, user, reply, tokens)?;
            }
        }
    }

    a.emergency_save();
    println!("Goodbye!");
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
