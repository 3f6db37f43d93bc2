use anyhow::Result;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::Parser;
use emodiary_dialogue::{ChatClient, DialogueMachine, LanguageModel, LlmConfig, TurnError};
use emodiary_retrieval::RetrievalConfig;
use emodiary_schemas::{
    ChatTurnRequest, CreateDiaryRequest, DiaryEntry, DiaryId, EmotionTaxonomy, UserId,
};
use emodiary_service::{
    backfill_summaries, consolidate_user, generate_weekly_summary, last_completed_week, Database,
    SharedDatabase,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emodiary-service", about = "Emotion diary dialogue service")]
struct Args {
    /// Address to bind the HTTP server to (falls back to BIND_ADDR)
    #[arg(long)]
    addr: Option<String>,

    /// SQLite database path (falls back to DB_PATH, then ./emodiary.db)
    #[arg(long)]
    db_path: Option<String>,
}

#[derive(Clone)]
struct AppState {
    db: SharedDatabase,
    llm: Arc<dyn LanguageModel>,
    machine: Arc<DialogueMachine>,
    // One lock per diary so concurrent turns on the same entry serialize.
    turn_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Emotion Diary Service v0.1.0");

    let args = Args::parse();

    let addr = args
        .addr
        .or_else(|| std::env::var("BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1:8712".to_string());

    let db_path = args
        .db_path
        .or_else(|| std::env::var("DB_PATH").ok())
        .unwrap_or_else(|| "emodiary.db".to_string());
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::new(&db_path)?;
    info!("Database initialized at: {}", db_path);

    let llm_config = LlmConfig::from_env()?;
    info!("Chat backend: {:?} ({})", llm_config.provider, llm_config.model);
    let llm = ChatClient::new(llm_config)?;

    let taxonomy = EmotionTaxonomy::from_env();
    info!("Emotion taxonomy: {}", taxonomy.name());
    let machine = DialogueMachine::new(taxonomy, RetrievalConfig::default());

    let state = AppState {
        db: SharedDatabase::new(db),
        llm: Arc::new(llm),
        machine: Arc::new(machine),
        turn_locks: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/api/diary/create", post(create_diary))
        .route("/api/diary/:diary_id", get(get_diary).delete(delete_diary))
        .route("/api/diary/consolidate/:user_id", post(consolidate))
        .route("/api/chat/turn", post(chat_turn))
        .route("/api/chat/weekly-summary/:user_id", get(weekly_summary))
        .route("/api/chat/backfill/:user_id", post(backfill))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "emodiary",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

async fn get_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let db = state.db.lock().await;

    let diaries = db.count_diaries().map_err(internal)?;
    let summaries = db.count_summaries().map_err(internal)?;

    Ok(Json(serde_json::json!({
        "diaries": diaries,
        "summaries": summaries
    })))
}

async fn create_diary(
    State(state): State<AppState>,
    Json(request): Json<CreateDiaryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if request.content.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "diary content is empty".to_string(),
        ));
    }

    let entry = DiaryEntry::new(request.user_id, request.timestamp, request.content);
    info!("Creating diary {} for {}", entry.id, entry.user_id);

    let db = state.db.lock().await;
    db.insert_diary(&entry).map_err(internal)?;

    Ok(Json(serde_json::json!({
        "diary_id": entry.id.0,
        "created_at": entry.created_at
    })))
}

async fn get_diary(
    State(state): State<AppState>,
    Path(diary_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let db = state.db.lock().await;
    let entry = db.get_diary(&DiaryId(diary_id)).map_err(internal)?;

    match entry {
        Some(entry) => Ok(Json(entry)),
        None => Err((StatusCode::NOT_FOUND, "Diary not found".to_string())),
    }
}

async fn delete_diary(
    State(state): State<AppState>,
    Path(diary_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let db = state.db.lock().await;
    let deleted = db.delete_diary(&DiaryId(diary_id)).map_err(internal)?;

    if deleted {
        Ok(Json(serde_json::json!({ "deleted": true })))
    } else {
        Err((StatusCode::NOT_FOUND, "Diary not found".to_string()))
    }
}

async fn chat_turn(
    State(state): State<AppState>,
    Json(request): Json<ChatTurnRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Serialize turns per diary; interleaved turns would clobber each
    // other's dialogue history.
    let lock = {
        let mut locks = state.turn_locks.lock().await;
        locks
            .entry(request.diary_id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    };
    let _guard = lock.lock().await;

    {
        let db = state.db.lock().await;
        let entry = db.get_diary(&request.diary_id).map_err(internal)?;
        match entry {
            Some(entry) if entry.user_id == request.user_id => {}
            _ => return Err((StatusCode::NOT_FOUND, "Diary not found".to_string())),
        }
    }

    let (response, effects) = state
        .machine
        .take_turn(state.llm.as_ref(), &state.db, &state.db, &request)
        .await
        .map_err(turn_error)?;

    // The client's dialogue plus the reply we are about to send.
    let mut dialogue = request.dialogue.clone();
    if !response.content.is_empty() {
        dialogue.push(emodiary_schemas::DialogueTurn::assistant(
            response.content.clone(),
        ));
    }

    let db = state.db.lock().await;
    db.update_after_turn(
        &request.diary_id,
        &dialogue,
        effects.context.as_ref(),
        effects.emotions.as_deref(),
        effects.reasons.as_deref(),
    )
    .map_err(internal)?;

    Ok(Json(response))
}

async fn weekly_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = UserId(user_id);
    let (start, _) = last_completed_week(Utc::now().date_naive());

    // The DB guard derefs to a !Sync rusqlite connection, which cannot be
    // held across an await in a Send handler; drive the future in place.
    let summary = tokio::task::block_in_place(|| {
        tokio::runtime::Handle::current().block_on(async {
            let db = state.db.lock().await;
            generate_weekly_summary(&db, state.llm.as_ref(), &user, start).await
        })
    })
    .map_err(|e| {
        error!("Weekly summary failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "summary failed".to_string())
    })?;

    Ok(Json(summary))
}

async fn backfill(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = UserId(user_id);

    // Same !Sync-across-await constraint as weekly_summary above.
    let summaries = tokio::task::block_in_place(|| {
        tokio::runtime::Handle::current().block_on(async {
            let db = state.db.lock().await;
            backfill_summaries(&db, state.llm.as_ref(), &user, Utc::now().date_naive()).await
        })
    })
    .map_err(|e| {
        error!("Backfill failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "backfill failed".to_string())
    })?;

    Ok(Json(serde_json::json!({
        "generated": summaries.len(),
        "summaries": summaries
    })))
}

async fn consolidate(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = UserId(user_id);

    let db = state.db.lock().await;
    let updated = consolidate_user(
        &db,
        state.machine.taxonomy(),
        &RetrievalConfig::default().weights,
        &user,
        Utc::now(),
    )
    .map_err(internal)?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!("Request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn turn_error(e: TurnError) -> (StatusCode, String) {
    match e {
        TurnError::UnknownPhase(_) | TurnError::MissingField(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        TurnError::ModelUnavailable(_) => {
            error!("Chat turn failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "chat failed".to_string())
        }
        TurnError::Store(_) => {
            error!("Chat turn failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "chat failed".to_string())
        }
    }
}
