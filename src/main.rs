// Main entry point for the catalog enrichment pipeline

use catalog_enrichment::{
    core::{types::*, Config, GateError},
    orchestration::{BatchOrchestrator, SelectionGate},
    phases::Collaborators,
    services::{
        GeminiClient, HttpCalculationService, HttpClassificationService, HttpItemDetailProvider,
        HttpMarketSearchService, InMemoryItemStore, ItemDetailProvider, ItemStore, JsonHttpClient,
    },
    utils::{Metrics, TokioSleeper},
};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<BatchOrchestrator>,
    gate: Arc<SelectionGate>,
    store: InMemoryItemStore,
    metrics: Metrics,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::new()?;

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "catalog_enrichment={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== CATALOG ENRICHMENT PIPELINE ===");
    info!(
        "Config: concurrency={} delay={}ms attempts={} threshold={}",
        config.concurrency(),
        config.inter_chunk_delay().as_millis(),
        config.retry.max_retries,
        config.confidence_threshold()
    );

    let metrics = Metrics::new();

    let store = match config.store.items_file {
        Some(ref path) => InMemoryItemStore::load_from_file(path)?,
        None => InMemoryItemStore::new(),
    };

    let collaborators = build_collaborators(&config)?;
    let gate = Arc::new(SelectionGate::with_metrics(metrics.clone()));

    info!("Initializing batch orchestrator...");
    let orchestrator = Arc::new(BatchOrchestrator::from_config(
        &config,
        collaborators,
        Arc::new(store.clone()),
        gate.clone(),
        metrics.clone(),
        Arc::new(TokioSleeper),
    ));

    let state = AppState {
        orchestrator,
        gate,
        store,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/batches/run", post(run_batch))
        .route("/batches/phases/:phase", post(run_single_phase))
        .route("/batches/cancel", post(cancel_batches))
        .route("/selections", get(pending_selections))
        .route("/selections/:item_id", post(resolve_selection))
        .route("/items", put(upsert_item))
        .route("/items/:item_id", get(get_item))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                       - Root endpoint");
    info!("  GET  /health                 - Health check");
    info!("  GET  /metrics                - Prometheus metrics");
    info!("  GET  /stats                  - Detailed statistics");
    info!("  POST /batches/run            - Run the enrichment chain");
    info!("  POST /batches/phases/:phase  - Run a single phase");
    info!("  POST /batches/cancel         - Cancel in-flight runs");
    info!("  GET  /selections             - Items awaiting a competitor choice");
    info!("  POST /selections/:item_id    - Choose or skip a competitor");
    info!("  PUT  /items                  - Import an item snapshot");
    info!("  GET  /items/:item_id         - Current item snapshot");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let services = &config.services;

    let mut detail_providers: Vec<Arc<dyn ItemDetailProvider>> = vec![Arc::new(
        HttpItemDetailProvider::new("primary", JsonHttpClient::new(&services.detail_primary_url)?),
    )];
    if let Some(ref url) = services.detail_fallback_url {
        detail_providers.push(Arc::new(HttpItemDetailProvider::new(
            "fallback",
            JsonHttpClient::new(url)?,
        )));
    }

    let gemini = Arc::new(GeminiClient::new(services)?);
    info!("✓ AI client ready (model: {})", gemini.model());

    Ok(Collaborators {
        classification: Arc::new(HttpClassificationService::new(JsonHttpClient::new(
            &services.classification_url,
        )?)),
        calculation: Arc::new(HttpCalculationService::new(JsonHttpClient::new(
            &services.calculation_url,
        )?)),
        market_search: Arc::new(HttpMarketSearchService::new(JsonHttpClient::new(
            &services.market_search_url,
        )?)),
        detail_providers,
        ai: gemini.clone(),
        translation: gemini,
    })
}

async fn root() -> &'static str {
    "Catalog Enrichment Pipeline"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = serde_json::to_value(state.metrics.snapshot()).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })?;

    Ok(Json(serde_json::json!({
        "metrics": snapshot,
        "circuit_breakers": state.orchestrator.circuit_stats(),
        "items": state.store.len(),
        "awaiting_selection": state.gate.pending().len(),
    })))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    item_ids: Vec<ItemId>,
    /// Phase to start the chain from; defaults to classification
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhaseRequest {
    item_ids: Vec<ItemId>,
}

fn parse_phase(raw: &str) -> Result<PhaseName, ApiError> {
    raw.parse::<PhaseName>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

fn require_items(item_ids: &[ItemId]) -> Result<(), ApiError> {
    if item_ids.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No item ids provided".to_string()));
    }
    Ok(())
}

/// Run the chain for a batch
///
/// # Request Format:
/// - `{"item_ids": ["1", "2"], "from": "fetch-detail"}` (`from` optional)
///
/// # Response:
/// - ChainReport JSON with every phase's BatchReport
async fn run_batch(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<ChainReport>, ApiError> {
    require_items(&request.item_ids)?;
    let start = match request.from {
        Some(ref raw) => parse_phase(raw)?,
        None => PhaseName::Classify,
    };

    info!("Received run request: {} items from {}", request.item_ids.len(), start);
    let report = state.orchestrator.run_from(start, &request.item_ids).await;
    Ok(Json(report))
}

/// Run one phase in isolation
async fn run_single_phase(
    State(state): State<AppState>,
    Path(phase): Path<String>,
    Json(request): Json<PhaseRequest>,
) -> Result<Json<BatchReport<PhaseOutput>>, ApiError> {
    require_items(&request.item_ids)?;
    let name = parse_phase(&phase)?;

    state
        .orchestrator
        .run_phase(name, &request.item_ids)
        .await
        .map(Json)
        .map_err(|e| {
            // Only a phase missing from the configured set fails the whole call
            error!("Phase {} failed to start: {}", name, e);
            (StatusCode::BAD_REQUEST, e.to_string())
        })
}

async fn cancel_batches(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.cancel_all();
    StatusCode::ACCEPTED
}

async fn pending_selections(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "pending": state.gate.pending() }))
}

/// Operator decision for one item
///
/// # Request Format:
/// - `{"decision": "choose", "external_item_id": "..."}` or `{"decision": "skip"}`
async fn resolve_selection(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
    Json(decision): Json<SelectionDecision>,
) -> Result<Json<Selection>, ApiError> {
    state
        .gate
        .resolve(&item_id, decision)
        .map(Json)
        .map_err(|e| match e {
            GateError::InvalidState { .. } => (StatusCode::CONFLICT, e.to_string()),
            GateError::UnknownCandidate { .. } => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        })
}

async fn upsert_item(State(state): State<AppState>, Json(item): Json<Item>) -> Result<StatusCode, ApiError> {
    if item.id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Item id must not be empty".to_string()));
    }
    info!("Imported item {}", item.id);
    state.store.upsert(item);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
) -> Result<Json<Item>, ApiError> {
    state
        .store
        .get(&item_id)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}
