use std::path::PathBuf;
use std::sync::Arc;

use chatsync::config::{ConfigError, EngineConfig};
use chatsync::event::StoreEvent;
use chatsync::services::conversation::ConversationStore;
use chatsync::services::remote::{HttpRemote, RemoteBackend, RemoteError};
use chatsync::services::sync::{self, CycleReport};
use chatsync::state::{CanvasKind, ChatMessage, Conversation, EngineState, NewMessage, VersionContent};
use chatsync::storage::{FileStorage, StorageError};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("local storage unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("remote setup failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("conversation {0} not found")]
    UnknownConversation(Uuid),
    #[error("canvas element {0} not found or operation refused")]
    CanvasRefused(String),
    #[error("message text is empty")]
    EmptyMessage,
    #[error("unknown canvas type `{0}`; expected document, code, or chart")]
    UnknownKind(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "chatsync", about = "Inspect and drive the local conversation store")]
struct Cli {
    /// Overrides CHAT_STORAGE_DIR.
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Ignore CHAT_REMOTE_URL for this run.
    #[arg(long, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Storage, tombstone, and sync queue summary.
    Inspect,
    List,
    Show {
        id: Uuid,
    },
    New {
        #[arg(long)]
        title: Option<String>,
    },
    Say {
        text: String,
        #[arg(long)]
        conversation: Option<Uuid>,
        #[arg(long, default_value_t = false)]
        assistant: bool,
    },
    /// Read user messages from stdin, one per line, with background sync running.
    Chat {
        #[arg(long)]
        conversation: Option<Uuid>,
    },
    Search {
        query: String,
    },
    Switch {
        id: Uuid,
    },
    Rename {
        id: Uuid,
        title: String,
    },
    Pin {
        id: Uuid,
        #[arg(long, default_value_t = false)]
        off: bool,
    },
    Delete {
        id: Uuid,
    },
    /// Pull from the remote, then push everything pending.
    Sync,
    Canvas(CanvasCommand),
}

#[derive(Args, Debug)]
struct CanvasCommand {
    #[command(subcommand)]
    command: CanvasSubcommand,
}

#[derive(Subcommand, Debug)]
enum CanvasSubcommand {
    List {
        #[arg(long)]
        conversation: Option<Uuid>,
    },
    Create {
        #[arg(long, value_parser = parse_kind)]
        kind: CanvasKind,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, help = "Markdown, source code, or chart JSON")]
        content: String,
        #[arg(long, default_value = "text")]
        language: String,
        #[arg(long, default_value = "")]
        request: String,
        #[arg(long)]
        conversation: Option<Uuid>,
    },
    Add {
        element_id: String,
        #[arg(long)]
        content: String,
        #[arg(long, default_value = "text")]
        language: String,
        #[arg(long, default_value = "")]
        request: String,
    },
    Rollback {
        element_id: String,
        number: u32,
    },
    DeleteVersion {
        element_id: String,
        number: u32,
    },
    Remove {
        element_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("ignoring unreadable .env: {e}");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    if cli.offline {
        config.remote_url = None;
    }

    let storage = FileStorage::open(config.storage_dir.clone(), Some(config.local_quota_bytes))?;
    let remote: Option<Arc<dyn RemoteBackend>> = match &config.remote_url {
        Some(url) => {
            let backend: Arc<dyn RemoteBackend> = Arc::new(HttpRemote::new(url.clone(), config.remote_timeout)?);
            Some(backend)
        }
        None => None,
    };
    let state = EngineState::new(config, Box::new(storage), remote);

    match cli.command {
        Command::Inspect => run_inspect(&state).await,
        Command::List => run_list(&state).await,
        Command::Show { id } => run_show(&state, id).await,
        Command::New { title } => {
            let conv = state.store.write().await.create_conversation(title.as_deref());
            flush(&state).await;
            print_json(&summary(&conv))
        }
        Command::Say { text, conversation, assistant } => {
            let message = if assistant { NewMessage::assistant(text) } else { NewMessage::user(text) };
            let added = state
                .store
                .write()
                .await
                .add_message(conversation, message)
                .ok_or(CliError::EmptyMessage)?;
            flush(&state).await;
            print_json(&serde_json::to_value(added)?)
        }
        Command::Chat { conversation } => run_chat(state, conversation).await,
        Command::Search { query } => {
            let hits = state.store.read().await.search(&query);
            print_json(&Value::Array(hits.iter().map(summary).collect()))
        }
        Command::Switch { id } => {
            let switched = state.store.write().await.switch_to(id).map(summary);
            print_json(&switched.ok_or(CliError::UnknownConversation(id))?)
        }
        Command::Rename { id, title } => {
            if !state.store.write().await.rename_conversation(id, &title) {
                return Err(CliError::UnknownConversation(id));
            }
            flush(&state).await;
            run_show(&state, id).await
        }
        Command::Pin { id, off } => {
            if !state.store.write().await.set_pinned(id, !off) {
                return Err(CliError::UnknownConversation(id));
            }
            flush(&state).await;
            run_list(&state).await
        }
        Command::Delete { id } => {
            if !state.store.write().await.delete_conversation(id) {
                return Err(CliError::UnknownConversation(id));
            }
            flush(&state).await;
            println!("deleted {id}");
            Ok(())
        }
        Command::Sync => {
            let admitted = sync::pull_remote(&state).await;
            let report = sync::sync_now(&state).await;
            print_json(&json!({ "pulled": admitted, "cycle": report_json(&report) }))
        }
        Command::Canvas(canvas) => run_canvas(&state, canvas).await,
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_inspect(state: &EngineState) -> Result<(), CliError> {
    let store = state.store.read().await;
    print_json(&json!({
        "storageDir": state.config.storage_dir.display().to_string(),
        "conversations": store.len(),
        "activeConversationId": store.active_id(),
        "tombstones": store.tombstones().len(),
        "localDegraded": store.local().is_degraded(),
        "pendingSync": store.sync_queue().pending_len(),
        "pendingDeletions": store.sync_queue().pending_deletions().len(),
        "remote": state.remote.as_ref().map(|r| json!({ "available": r.is_available(), "userId": r.user_id() })),
    }))
}

async fn run_list(state: &EngineState) -> Result<(), CliError> {
    let store = state.store.read().await;
    print_json(&Value::Array(store.all().into_iter().map(summary).collect()))
}

async fn run_show(state: &EngineState, id: Uuid) -> Result<(), CliError> {
    let store = state.store.read().await;
    let conv = store.get(id).ok_or(CliError::UnknownConversation(id))?;
    print_json(&serde_json::to_value(conv)?)
}

async fn run_chat(state: EngineState, conversation: Option<Uuid>) -> Result<(), CliError> {
    let mut events = state.subscribe();
    let sync_task = sync::start_sync(state.clone()).await;
    // PHASE: TARGET CHECK
    // WHY: checked after the startup pull, which may admit the conversation.
    if let Err(e) = check_conversation(&*state.store.read().await, conversation) {
        sync_task.abort();
        return Err(e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let added = state.store.write().await.add_message(conversation, NewMessage::user(line));
        if added.is_none() {
            continue;
        }
        while let Ok(event) = events.try_recv() {
            print_event(&event);
        }
    }

    sync_task.abort();
    flush(&state).await;
    Ok(())
}

async fn run_canvas(state: &EngineState, canvas: CanvasCommand) -> Result<(), CliError> {
    match canvas.command {
        CanvasSubcommand::List { conversation } => {
            let store = state.store.read().await;
            let id = conversation.or_else(|| store.active_id());
            let elements = id.map(|id| store.canvas_elements(id)).unwrap_or_default();
            print_json(&serde_json::to_value(elements)?)
        }
        CanvasSubcommand::Create { kind, title, content, language, request, conversation } => {
            let content = version_content(kind, content, language)?;
            let element = state
                .store
                .write()
                .await
                .create_canvas_element(conversation, kind, &title, content, &request)
                .ok_or_else(|| CliError::CanvasRefused(title.clone()))?;
            flush(state).await;
            print_json(&serde_json::to_value(element)?)
        }
        CanvasSubcommand::Add { element_id, content, language, request } => {
            let mut store = state.store.write().await;
            let kind = store
                .canvas_element(&element_id)
                .map(|e| e.kind)
                .ok_or_else(|| CliError::CanvasRefused(element_id.clone()))?;
            let version = store
                .add_canvas_version(&element_id, version_content(kind, content, language)?, &request)
                .ok_or_else(|| CliError::CanvasRefused(element_id.clone()))?;
            drop(store);
            flush(state).await;
            print_json(&serde_json::to_value(version)?)
        }
        CanvasSubcommand::Rollback { element_id, number } => {
            if !state.store.write().await.rollback_canvas(&element_id, number) {
                return Err(CliError::CanvasRefused(element_id));
            }
            println!("{element_id} now at version {number}");
            Ok(())
        }
        CanvasSubcommand::DeleteVersion { element_id, number } => {
            if !state.store.write().await.delete_canvas_version(&element_id, number) {
                return Err(CliError::CanvasRefused(element_id));
            }
            println!("{element_id} version {number} deleted");
            Ok(())
        }
        CanvasSubcommand::Remove { element_id } => {
            if !state.store.write().await.delete_canvas_element_permanently(&element_id) {
                return Err(CliError::CanvasRefused(element_id));
            }
            flush(state).await;
            println!("{element_id} removed");
            Ok(())
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Push pending work now. One-shot commands exit before the debounce fires.
async fn flush(state: &EngineState) {
    if state.remote.is_some() {
        let report = sync::sync_now(state).await;
        tracing::debug!(pushed = report.pushed, requeued = report.requeued, "exit flush");
    }
}

/// Reject an explicit conversation id the store does not know.
fn check_conversation(store: &ConversationStore, conversation: Option<Uuid>) -> Result<(), CliError> {
    match conversation {
        Some(id) if store.get(id).is_none() => Err(CliError::UnknownConversation(id)),
        _ => Ok(()),
    }
}

fn parse_kind(raw: &str) -> Result<CanvasKind, CliError> {
    match raw.to_ascii_lowercase().as_str() {
        "document" | "doc" => Ok(CanvasKind::Document),
        "code" => Ok(CanvasKind::Code),
        "chart" => Ok(CanvasKind::Chart),
        _ => Err(CliError::UnknownKind(raw.to_owned())),
    }
}

fn version_content(kind: CanvasKind, content: String, language: String) -> Result<VersionContent, CliError> {
    Ok(match kind {
        CanvasKind::Document => VersionContent::Document { markdown: content },
        CanvasKind::Code => VersionContent::Code { language, source: content },
        CanvasKind::Chart => VersionContent::Chart { spec: serde_json::from_str(&content)? },
    })
}

fn summary(conv: &Conversation) -> Value {
    json!({
        "id": conv.id,
        "title": conv.title,
        "messages": conv.messages.len(),
        "canvasElements": conv.canvas_elements.len(),
        "pinned": conv.pinned,
        "updatedAt": conv.updated_at,
    })
}

fn report_json(report: &CycleReport) -> Value {
    json!({
        "kind": report.kind.map(|k| format!("{k:?}")),
        "pushed": report.pushed,
        "deleted": report.deleted,
        "requeued": report.requeued,
        "unavailable": report.unavailable,
    })
}

fn print_event(event: &StoreEvent) {
    match event {
        StoreEvent::ConversationCreated { id } => eprintln!("created conversation {id}"),
        StoreEvent::ConversationUpdated { id, message, total } => eprintln!("{id} [{total}] {}", preview(message)),
        StoreEvent::CanvasActivated { element_id, kind, .. } => eprintln!("canvas {element_id} ({kind}) active"),
    }
}

fn preview(message: &ChatMessage) -> String {
    let who = if message.is_user { "you" } else { "assistant" };
    format!("{who}: {}", message.text)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
