mod bootstrap;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coderag_core::config::Config;
use coderag_core::{QueryEvent, QueryRequest, QueryResponse};
use coderag_memory::{ConversationStore, SessionId};
use tokio_stream::StreamExt;

#[derive(Debug, Parser)]
#[command(name = "coderag", version, about = "Ask questions about a code repository")]
struct Cli {
    /// Configuration file. Falls back to `CODERAG_CONFIG`, then `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer a question, optionally continuing a session.
    Ask {
        query: String,
        #[arg(long)]
        session: Option<SessionId>,
        #[arg(long, default_value = "anonymous")]
        user: String,
        /// Print progress events as they happen.
        #[arg(long)]
        stream: bool,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    New {
        #[arg(long, default_value = "anonymous")]
        user: String,
    },
    Close {
        id: SessionId,
    },
    History {
        id: SessionId,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)?;

    tokio::select! {
        result = run(cli.command, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    }
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Ask {
            query,
            session,
            user,
            stream,
            json,
        } => {
            let orchestrator = Arc::new(bootstrap::build_orchestrator(config).await?);
            let mut request = QueryRequest::new(query).for_user(user);
            request.session_id = session;
            if stream {
                ask_streaming(&orchestrator, request, json).await
            } else {
                let response = orchestrator.handle_query(request).await?;
                print_response(&response, json)
            }
        }
        Command::Session(cmd) => {
            let store = bootstrap::open_store(config).await?;
            run_session_command(&store, cmd).await
        }
    }
}

async fn ask_streaming(
    orchestrator: &Arc<coderag_core::Orchestrator<coderag_llm::any::AnyProvider>>,
    request: QueryRequest,
    json: bool,
) -> anyhow::Result<()> {
    let mut events = std::pin::pin!(orchestrator.handle_query_stream(request));
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        if json {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
            continue;
        }
        match event {
            QueryEvent::SessionCreated { session_id } => eprintln!("session {session_id}"),
            QueryEvent::Thinking { .. } => eprintln!("thinking..."),
            QueryEvent::Routed {
                intent, sources, ..
            } => {
                let names: Vec<String> = sources.iter().map(ToString::to_string).collect();
                eprintln!("intent {intent}, consulting {}", names.join(", "));
            }
            QueryEvent::PartialResult(summary) => match &summary.error {
                Some(e) => eprintln!("  {} failed: {e}", summary.source),
                None => eprintln!(
                    "  {} returned {} items in {}ms",
                    summary.source, summary.items, summary.elapsed_ms
                ),
            },
            QueryEvent::Chunk { text } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            QueryEvent::Complete { response, error } => {
                writeln!(stdout)?;
                if let Some(e) = error {
                    anyhow::bail!(e);
                }
                if let Some(response) = response {
                    print_citations(&response);
                }
            }
        }
    }
    Ok(())
}

fn print_response(response: &QueryResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    println!("{}", response.answer.text);
    print_citations(response);
    eprintln!("session {}", response.session_id);
    Ok(())
}

fn print_citations(response: &QueryResponse) {
    if !response.answer.citations.is_empty() {
        println!("\nSources:");
        for c in &response.answer.citations {
            println!("  [{}] {}", c.index, c.provenance);
        }
    }
    if !response.answer.degraded_sources.is_empty() {
        let names: Vec<String> = response
            .answer
            .degraded_sources
            .iter()
            .map(ToString::to_string)
            .collect();
        eprintln!("unavailable: {}", names.join(", "));
    }
}

async fn run_session_command(store: &ConversationStore, cmd: SessionCommand) -> anyhow::Result<()> {
    match cmd {
        SessionCommand::New { user } => {
            let session = store.create_session(&user, serde_json::Map::new()).await?;
            println!("{}", session.id);
        }
        SessionCommand::Close { id } => {
            let session = store.close_session(id).await?;
            if let Some(closed_at) = session.closed_at {
                println!("closed {id} at {}", closed_at.to_rfc3339());
            }
        }
        SessionCommand::History { id, limit } => {
            store
                .session(id)
                .await?
                .with_context(|| format!("session not found: {id}"))?;
            let turns = store.recent_context(id, limit).await?;
            for turn in turns.iter().rev() {
                println!("#{} {}: {}", turn.turn_number, turn.role.as_str(), turn.content);
            }
        }
    }
    Ok(())
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("CODERAG_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
