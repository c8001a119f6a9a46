use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use governance_ledger::config::AppConfig;
use governance_ledger::cries::{Citation, ScoringInput, TriTrackWeights};
use governance_ledger::database::Database;
use governance_ledger::ledger::{NewAuditRecord, OrgId, Receipt};
use governance_ledger::{GovernanceEngine, LedgerError};

type AppState = Arc<GovernanceEngine>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "governance_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting governance ledger");

    let config = AppConfig::load()?;
    let canon = config.load_canon()?;
    info!("Configuration loaded");

    let database = Database::new(&config.database_url).await?;
    info!("Database connected and migrated");

    let addr = config.bind_address();
    let engine = Arc::new(GovernanceEngine::new(config, canon, Arc::new(database))?);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .route("/records", post(submit_record))
        .route("/cries/compute", post(compute_cries))
        .route("/verify/:org_id", get(verify_org))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(engine);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::ValidationError(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::ConflictError(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "governance-ledger",
        "timestamp": Utc::now()
    }))
}

async fn status_endpoint(State(engine): State<AppState>) -> Json<Value> {
    let config = engine.config();
    let subscribers = engine.subscribers().len().await;
    Json(json!({
        "status": "healthy",
        "service": "governance-ledger",
        "timestamp": Utc::now(),
        "ledger": {
            "block_threshold": config.block_threshold,
            "take_window": config.take_window,
        },
        "canon": {
            "components": engine.canon().components.keys().collect::<Vec<_>>(),
            "tri_track": engine.canon().tri_track,
        },
        "subscribers": subscribers,
    }))
}

async fn submit_record(
    State(engine): State<AppState>,
    Json(record): Json<NewAuditRecord>,
) -> Result<Json<Value>, ApiError> {
    let (stored, outcome) = engine.submit(record).await?;
    Ok(Json(json!({
        "record": stored,
        "block": outcome.sealed,
        "deliveries": outcome.pushed.len(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRequest {
    prompt: String,
    response: String,
    receipt: Value,
    #[serde(default)]
    prev_receipt: Option<Value>,
    #[serde(default)]
    citations: Vec<Citation>,
    /// Optional Tri-Track weights, validated even though a single exchange
    /// only fills one track.
    #[serde(default)]
    weights: Option<TriTrackWeights>,
}

async fn compute_cries(
    State(engine): State<AppState>,
    Json(request): Json<ComputeRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(weights) = &request.weights {
        weights.validate()?;
    }

    let receipt = Receipt::from_value(request.receipt)?;
    let prev_receipt = request.prev_receipt.map(Receipt::from_value).transpose()?;

    let snapshot = engine.score_exchange(&ScoringInput {
        prompt: &request.prompt,
        response: &request.response,
        receipt: &receipt,
        prev_receipt: prev_receipt.as_ref(),
        citations: &request.citations,
    });
    let thresholds = engine.check_thresholds(&snapshot.scores);

    Ok(Json(json!({
        "cries": snapshot,
        "thresholds": thresholds,
    })))
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn verify_org(
    State(engine): State<AppState>,
    Path(org_id): Path<OrgId>,
    Query(range): Query<VerifyQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = engine.verify_chain(org_id, range.start, range.end).await?;
    let blocks = engine.verify_blocks(org_id).await?;
    Ok(Json(json!({
        "isValid": records.is_valid && blocks.is_valid,
        "records": records,
        "blocks": blocks,
    })))
}
