use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use town_core::clock::time_for_tick;
use town_core::fixed::TICK_DURATION_MS;
use town_core::persist::{JsonFileStore, SnapshotStore};
use town_core::rng::seed_from_phrase;
use town_core::world::{Character, CharacterId, RoomId};
use town_core::{
    ActionRequest, ErrorCode, MemoryStore, Observer, Registration, RegistrationError,
    Rejection, Scheduler, SchedulerGone, SchedulerHandle, Store, Subscription, TownDef,
};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 200;
const DEFAULT_LEADERBOARD: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "townd", about = "Frontier town simulation daemon")]
struct Args {
    /// Path to a town JSON document. The built-in town is used when omitted.
    #[arg(long, value_name = "PATH")]
    town: Option<PathBuf>,

    /// Numeric world seed.
    #[arg(long, value_name = "NUMBER", conflicts_with = "seed_phrase", default_value_t = 1)]
    seed: u64,

    /// Derive the world seed from a phrase instead.
    #[arg(long = "seed-phrase", value_name = "TEXT")]
    seed_phrase: Option<String>,

    /// Address to bind (defaults to 127.0.0.1).
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on for HTTP and WebSocket clients.
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Milliseconds between ticks.
    #[arg(long, default_value_t = TICK_DURATION_MS)]
    tick_ms: u64,

    /// JSON file the town is saved to and restored from. Without it the town
    /// lives in memory only.
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    name: Arc<str>,
    town: SchedulerHandle<MemoryStore>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error_code: String,
    narrative: String,
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn new(status: StatusCode, code: &str, narrative: impl Into<String>) -> Self {
        Self {
            status,
            error: ApiError {
                error_code: code.to_string(),
                narrative: narrative.into(),
            },
        }
    }

    fn rejected(rejection: Rejection) -> Self {
        let status = match rejection.code {
            ErrorCode::WorldPaused => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::AlreadyActing => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::TargetNotFound => StatusCode::NOT_FOUND,
            ErrorCode::CharacterDead | ErrorCode::ActionForbidden | ErrorCode::InDuel => {
                StatusCode::FORBIDDEN
            }
            ErrorCode::InvalidAction | ErrorCode::InvalidParams => StatusCode::BAD_REQUEST,
        };
        Self::new(status, rejection.code.as_str(), rejection.narrative)
    }

    fn registration(err: RegistrationError) -> Self {
        match err {
            RegistrationError::NameTaken(_) => {
                Self::new(StatusCode::CONFLICT, "NAME_TAKEN", err.to_string())
            }
            RegistrationError::Store(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
            }
            _ => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidParams.as_str(),
                err.to_string(),
            ),
        }
    }

    fn gone(_: SchedulerGone) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            "The town is closing up for the night.",
        )
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, HttpApiError>;

fn load_town(path: Option<&Path>) -> Result<TownDef> {
    match path {
        Some(path) => TownDef::load_from_path(path)
            .with_context(|| format!("failed to load town from {:?}", path)),
        None => TownDef::deadwood(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();

    let town = Arc::new(load_town(args.town.as_deref())?);
    let seed = args
        .seed_phrase
        .as_deref()
        .map(seed_from_phrase)
        .unwrap_or(args.seed);
    let narration = town.narration();
    let snapshots = args
        .state
        .as_ref()
        .map(|path| Arc::new(JsonFileStore::new(path)) as Arc<dyn SnapshotStore>);

    let scheduler = Scheduler::boot(Arc::clone(&town), seed, narration, snapshots).await?;
    let (handle, ticker) = scheduler.spawn(Duration::from_millis(args.tick_ms.max(1)));

    let state = AppState {
        name: Arc::from(town.name.as_str()),
        town: handle.clone(),
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;

    info!(%addr, town = %town.name, seed, "starting townd");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if handle.stop().await.is_err() {
        warn!("scheduler already stopped");
    }
    if let Err(err) = ticker.await {
        error!(?err, "scheduler task failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/act", post(act))
        .route("/world", get(world))
        .route("/characters", get(characters))
        .route("/graveyard", get(graveyard))
        .route("/leaderboard", get(leaderboard))
        .route("/bounties", get(bounties))
        .route("/events", get(events))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/observe", get(observe))
        .with_state(state)
}

async fn register(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> ApiResult<(StatusCode, Json<Character>)> {
    let character = state
        .town
        .register(registration)
        .await
        .map_err(HttpApiError::gone)?
        .map_err(HttpApiError::registration)?;
    Ok((StatusCode::CREATED, Json(character)))
}

#[derive(Debug, Deserialize)]
struct ActBody {
    character_id: CharacterId,
    #[serde(flatten)]
    request: ActionRequest,
}

async fn act(State(state): State<AppState>, Json(body): Json<ActBody>) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = body.character_id;
    let known = state
        .town
        .query(move |engine| engine.store.character(id).is_some())
        .await
        .map_err(HttpApiError::gone)?;
    if !known {
        return Err(HttpApiError::rejected(Rejection::new(
            ErrorCode::TargetNotFound,
            "No such character.",
        )));
    }
    state
        .town
        .submit(id, body.request)
        .await
        .map_err(HttpApiError::rejected)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}

async fn world(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let name = Arc::clone(&state.name);
    let summary = state
        .town
        .query(move |engine| {
            let world = engine.store.world();
            json!({
                "name": &*name,
                "tick": world.tick,
                "time": time_for_tick(world.tick),
                "paused": world.paused,
                "started_at": world.started_at,
                "living": engine.store.living_characters().len(),
                "dead": engine.store.graveyard().len(),
                "active_duels": engine.store.active_duels().len(),
            })
        })
        .await
        .map_err(HttpApiError::gone)?;
    Ok(Json(summary))
}

async fn characters(State(state): State<AppState>) -> ApiResult<Json<Vec<Character>>> {
    let living = state
        .town
        .query(|engine| engine.store.living_characters())
        .await
        .map_err(HttpApiError::gone)?;
    Ok(Json(living))
}

async fn graveyard(State(state): State<AppState>) -> ApiResult<Json<Vec<Character>>> {
    let dead = state
        .town
        .query(|engine| engine.store.graveyard())
        .await
        .map_err(HttpApiError::gone)?;
    Ok(Json(dead))
}

#[derive(Debug, Default, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<Vec<Character>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD);
    let top = state
        .town
        .query(move |engine| engine.store.leaderboard(limit))
        .await
        .map_err(HttpApiError::gone)?;
    Ok(Json(top))
}

async fn bounties(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let active = state
        .town
        .query(|engine| json!(engine.store.active_bounties()))
        .await
        .map_err(HttpApiError::gone)?;
    Ok(Json(active))
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    room: Option<String>,
    limit: Option<usize>,
}

fn event_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_EVENT_LIMIT).clamp(1, MAX_EVENT_LIMIT)
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = event_limit(query.limit);
    let room = query.room.map(RoomId::new);
    let recent = state
        .town
        .query(move |engine| match &room {
            Some(room) => json!(engine.store.events_in_room(room, limit)),
            None => json!(engine.store.recent_events(limit)),
        })
        .await
        .map_err(HttpApiError::gone)?;
    Ok(Json(recent))
}

async fn pause(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.town.pause().await.map_err(HttpApiError::gone)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.town.resume().await.map_err(HttpApiError::gone)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct ObserveQuery {
    room: Option<String>,
    agent: Option<u64>,
}

fn observer_for(query: &ObserveQuery) -> Observer {
    match (query.agent, &query.room) {
        (Some(id), _) => Observer::Agent { id: CharacterId(id) },
        (None, Some(room)) => Observer::rooms([RoomId::new(room.as_str())]),
        (None, None) => Observer::everywhere(),
    }
}

/// Messages a spectator may send to change the rooms it watches.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WatchCommand {
    Watch(RoomId),
    Unwatch(RoomId),
}

async fn observe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ObserveQuery>,
) -> impl IntoResponse {
    let subscription = state.town.subscribe(observer_for(&query));
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let line = match serde_json::to_string(&*event) {
                    Ok(line) => line,
                    Err(err) => {
                        error!(?err, "failed to serialize event");
                        continue;
                    }
                };
                if sink.send(Message::Text(line)).await.is_err() {
                    debug!("websocket client disconnected");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WatchCommand>(&text) {
                    Ok(WatchCommand::Watch(room)) => subscription.watch(room, true),
                    Ok(WatchCommand::Unwatch(room)) => subscription.watch(room, false),
                    Err(err) => debug!(%err, "ignoring client message"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}
