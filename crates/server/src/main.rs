//! Agora Server
//!
//! Axum server and CLI around the Agora coordinator. Owns no orchestration
//! logic: it loads configuration, wires the SQLite sink, episodic recall and
//! broadcast notifier into a `Coordinator`, and exposes sessions over HTTP.

mod api;

use agora_core::config::{runtime_path, OrchestratorConfig};
use agora_core::memory::SqliteEpisodes;
use agora_core::state::{AgoraDb, SqliteEventSink};
use agora_core::swarm::{BroadcastNotifier, Coordinator, CoordinatorCommand, ScriptFile};
use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast::error::RecvError, mpsc, RwLock},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::{OpenApi, ToSchema};

/// Buffered workspace updates per SSE subscriber
const UPDATE_BUFFER: usize = 100;

/// Application state
pub struct AppState {
    /// Defaults for every session started by this server
    pub config: OrchestratorConfig,
    pub sink: Arc<SqliteEventSink>,
    pub episodes: Arc<SqliteEpisodes>,
    pub notifier: BroadcastNotifier,
    /// Command channels of sessions still running: session_id -> sender
    pub running: RwLock<HashMap<String, mpsc::Sender<CoordinatorCommand>>>,
}

impl AppState {
    pub fn new(db: &AgoraDb, config: OrchestratorConfig) -> Self {
        Self {
            config,
            sink: Arc::new(SqliteEventSink::new(db)),
            episodes: Arc::new(SqliteEpisodes::new(db)),
            notifier: BroadcastNotifier::new(UPDATE_BUFFER),
            running: RwLock::new(HashMap::new()),
        }
    }
}

pub type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
struct ServerStatus {
    status: String,
    version: String,
    running_sessions: usize,
    max_iterations: u32,
    max_workspace_tokens: usize,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Agora - shared-workspace multi-agent orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Agora server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Write a default config to the runtime directory
    Init,
    /// Run one session on a goal (CLI mode, no server)
    Run {
        /// The goal to reach
        goal: String,
        /// Agent script file ({"agents": [...]})
        #[arg(short, long)]
        script: PathBuf,
        /// Override max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Do not record the session in the database
        #[arg(long)]
        no_persist: bool,
    },
    /// List past sessions
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Agora API",
        version = "1.0.0",
        description = "API for the Agora shared-workspace orchestrator"
    ),
    paths(
        get_status,
        api::sessions::start_session,
        api::sessions::list_sessions,
        api::sessions::get_session,
        api::sessions::session_events,
        api::sessions::cancel_session,
        api::memory::search_memory,
    ),
    components(schemas(
        ApiResponse,
        ServerStatus,
        api::sessions::StartSessionRequest,
        api::sessions::SessionOverrides,
        api::sessions::StartSessionResponse,
        api::memory::MemorySearchRequest,
    )),
    tags(
        (name = "sessions", description = "Orchestration sessions"),
        (name = "memory", description = "Episodic memory")
    )
)]
struct ApiDoc;

// === API Handlers ===

/// Server status
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "sessions",
    responses(
        (status = 200, description = "Server status", body = ServerStatus)
    )
)]
async fn get_status(State(state): State<SharedState>) -> Json<ServerStatus> {
    let running_sessions = state.running.read().await.len();
    Json(ServerStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running_sessions,
        max_iterations: state.config.max_iterations,
        max_workspace_tokens: state.config.max_workspace_tokens,
    })
}

/// SSE endpoint for workspace updates with heartbeat
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe();

    // Heartbeat comment every 15 seconds of silence
    let stream = stream::unfold(rx, |mut rx| async move {
        let timeout = tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await;

        match timeout {
            Ok(Ok(update)) => {
                let json = serde_json::to_string(&update).unwrap_or_default();
                Some((Ok(Event::default().event("workspace").data(json)), rx))
            }
            Ok(Err(RecvError::Lagged(skipped))) => Some((
                Ok(Event::default().comment(format!("lagged {}", skipped))),
                rx,
            )),
            Ok(Err(RecvError::Closed)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/events", get(events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .nest("/api/v1/sessions", api::sessions::session_routes())
        .nest("/api/v1/memory", api::memory::memory_routes())
        .with_state(state)
}

// === CLI Commands ===

async fn serve(port: u16, config: OrchestratorConfig) -> anyhow::Result<()> {
    let db = AgoraDb::open()?;
    let state: SharedState = Arc::new(AppState::new(&db, config));
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Agora server running at http://{}", addr);
    println!("   API v1 Routes:");
    println!("   Status:    /api/v1/status");
    println!("   Sessions:  /api/v1/sessions, /:id, /:id/events, /:id/cancel");
    println!("   Events:    /api/v1/events (SSE)");
    println!("   Memory:    /api/v1/memory/search");
    println!("   OpenAPI:   /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_runtime() -> anyhow::Result<()> {
    let dir = runtime_path();
    std::fs::create_dir_all(&dir)?;

    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, "# Local state\n*.db\n.env\n")?;
    }

    let config_path = dir.join("config.json");
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
    } else {
        OrchestratorConfig::default().save_to(&config_path)?;
        println!("Created: {}", config_path.display());
    }
    Ok(())
}

async fn run_once(
    goal: String,
    script: PathBuf,
    mut config: OrchestratorConfig,
    max_iterations: Option<u32>,
    no_persist: bool,
) -> anyhow::Result<()> {
    if let Some(max) = max_iterations {
        config.max_iterations = max;
    }
    let agents = ScriptFile::load(&script)?.into_agents();

    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling after the current round");
            let _ = cmd_tx.send(CoordinatorCommand::Abort).await;
        }
    });

    let mut coordinator = Coordinator::new(config, agents).with_command_channel(cmd_rx);
    // Keep the database open for the whole run
    let _db = if no_persist {
        None
    } else {
        let db = AgoraDb::open()?;
        coordinator = coordinator
            .with_event_sink(Arc::new(SqliteEventSink::new(&db)))
            .with_recall(Arc::new(SqliteEpisodes::new(&db)));
        Some(db)
    };

    let result = coordinator.run(&goal).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn list_sessions(limit: usize) -> anyhow::Result<()> {
    let db = AgoraDb::open()?;
    let sessions = SqliteEventSink::new(&db).list_sessions(limit)?;

    if sessions.is_empty() {
        println!("No sessions yet");
        return Ok(());
    }
    for s in sessions {
        println!(
            "{}  {:<9} {:<18} iter={:<3} {}",
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            s.status,
            s.termination.as_deref().unwrap_or("-"),
            s.iterations,
            s.goal
        );
    }
    Ok(())
}

fn load_env() {
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_path(runtime_path().join(".env"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();

    // Logs go to stderr so `agora run` output stays clean JSON
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = OrchestratorConfig::load()?;

    match args.command {
        Some(CliCommand::Init) => init_runtime(),
        Some(CliCommand::Run {
            goal,
            script,
            max_iterations,
            no_persist,
        }) => run_once(goal, script, config, max_iterations, no_persist).await,
        Some(CliCommand::Sessions { limit }) => list_sessions(limit),
        Some(CliCommand::Serve { port }) => serve(port, config).await,
        None => serve(8080, config).await,
    }
}
