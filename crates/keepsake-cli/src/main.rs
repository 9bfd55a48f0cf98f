use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keepsake_agents::{RetrievalQuery, SessionManager};
use keepsake_common::{Message, Role};
use keepsake_config::{AppConfig, ConfigLoader};
use keepsake_security::RedactingWriter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keepsake", version, about = "Safety-gated companion agent with two-tier memory")]
struct Cli {
    /// Path to config file (YAML or TOML)
    #[arg(short, long, global = true, env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat interactively over stdin
    Chat {
        /// Resume or name a session (a fresh one is generated otherwise)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Inspect or clear long-term memory
    Memory {
        #[command(subcommand)]
        action: MemoryCommand,
    },
    /// Check that the model and embedding servers respond
    Health,
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Rank stored memories against a query
    Search {
        query: String,
        /// Number of results (defaults to the configured value)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Delete every long-term memory
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config)?;
    let manager = SessionManager::from_config(&config, None)
        .context("failed to initialise the session manager")?;

    match cli.command {
        Command::Chat { session } => chat(&manager, session).await,
        Command::Memory { action } => memory(&manager, &config, action).await,
        Command::Health => health(&manager).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new()?,
    };
    let config = loader
        .load()
        .with_context(|| format!("failed to load {}", loader.config_path().display()))?;
    Ok(config)
}

async fn chat(manager: &SessionManager, session: Option<String>) -> Result<()> {
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(%session_id, "starting chat session");
    println!("Session {session_id}. Type /quit to leave.");

    let mut seen = manager.history(&session_id).await?.len();
    if seen > 0 {
        println!("Resumed with {seen} earlier messages.");
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        match manager.handle_message(&session_id, line).await {
            Ok(log) => {
                for message in log[seen.min(log.len())..].iter().filter(|m| is_reply(m)) {
                    println!("{}", message.text().unwrap_or_default());
                }
                seen = log.len();
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

fn is_reply(message: &Message) -> bool {
    message.visible && message.role == Role::Assistant && message.has_text()
}

async fn memory(manager: &SessionManager, config: &AppConfig, action: MemoryCommand) -> Result<()> {
    let Some(long_term) = manager.long_term() else {
        bail!("long-term memory is disabled (memory.mode = {:?})", config.memory.mode);
    };

    match action {
        MemoryCommand::Search { query, limit } => {
            let mut request = RetrievalQuery::with_weights(query, &config.memory.retrieval);
            if let Some(limit) = limit {
                request.num_results = limit;
            }
            let results = long_term.retrieve(&request).await?;
            if results.is_empty() {
                println!("No memories found.");
            }
            for (i, memory) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (importance {}, {})",
                    i + 1,
                    memory.score,
                    memory.record.content,
                    memory.record.importance,
                    memory.record.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        MemoryCommand::Reset { yes } => {
            if !yes {
                bail!("refusing to delete long-term memory without --yes");
            }
            let removed = long_term.reset().await?;
            println!("Deleted {removed} memories.");
        }
    }
    Ok(())
}

async fn health(manager: &SessionManager) -> Result<()> {
    let health = manager.health_check().await;
    println!("model:      {}", status(health.model));
    match health.embeddings {
        Some(ok) => println!("embeddings: {}", status(ok)),
        None => println!("embeddings: disabled"),
    }
    if !health.model || health.embeddings == Some(false) {
        bail!("one or more services are unreachable");
    }
    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok { "ok" } else { "unreachable" }
}
