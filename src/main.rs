use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use safewalk::gateway::{CrowdSubmission, DangerReport, EventSubmission, Rejection, RejectionKind};
use safewalk::hazard::HazardId;
use safewalk::ranker::RankedRoute;
use safewalk::store::{HazardStore, JsonlStore, MemoryStore};
use safewalk::{
    DirectionsRequest, EngineConfig, Error, FixtureDirections, GeoPoint, HazardModel,
    RankedRoutes, RankingMode, RawRoute, SafeRouteService, TravelMode,
};

#[derive(Parser)]
#[command(name = "safewalk")]
#[command(about = "Safety-ranked walking routes and hazard reports", long_about = None)]
struct Cli {
    #[arg(long, env = "SAFEWALK_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,
    /// TOML file with engine tunables
    #[arg(long, env = "SAFEWALK_CONFIG")]
    config: Option<PathBuf>,
    /// JSON-lines hazard log; hazards live in memory only when absent
    #[arg(long, env = "SAFEWALK_STORE")]
    store: Option<PathBuf>,
    /// JSON file of canned directions alternatives
    #[arg(long, env = "SAFEWALK_DIRECTIONS")]
    directions: Option<PathBuf>,
}

// Shared State for concurrency
struct AppState {
    service: SafeRouteService<FixtureDirections>,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    // 1. Engine config
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    // 2. Hazard data, replayed from the log when one is configured
    let store: Arc<dyn HazardStore> = match &cli.store {
        Some(path) => Arc::new(JsonlStore::open(path)?),
        None => Arc::new(MemoryStore::default()),
    };
    let hazards = Arc::new(HazardModel::restore(Arc::new(config), store)?);

    // 3. Directions
    let provider = match &cli.directions {
        Some(path) => FixtureDirections::load(path)?,
        None => {
            log::warn!("No directions fixtures configured; /route needs inline alternatives");
            FixtureDirections::default()
        }
    };

    let shared_state = Arc::new(AppState {
        service: SafeRouteService::new(hazards, provider),
    });

    log::info!("API server listening on http://{}", cli.bind);
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    axum::serve(listener, router(shared_state)).await?;

    Ok(())
}

fn router(shared_state: SharedState) -> Router {
    // CORS (the map client is served from elsewhere)
    let cors = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(health))
        .route("/route", post(calculate_route))
        .route("/api/report-danger", post(report_danger))
        .route("/api/report-crowd", post(report_crowd))
        .route("/api/add-event", post(add_event))
        .route("/api/dangers", get(list_dangers))
        .route("/api/dangers/:id/expire", post(expire_danger))
        .route("/api/crowds", get(list_crowds))
        .route("/api/events", get(list_events))
        .route("/api/events/today", get(today_events))
        .layer(cors)
        .with_state(shared_state)
}

// --- API DTOs ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRequest {
    origin: [f64; 2],      // [lat, lon]
    destination: [f64; 2], // [lat, lon]
    #[serde(default)]
    mode: RankingMode,
    #[serde(default)]
    travel_mode: TravelMode,
    /// Alternatives the client already fetched; skips the provider when present.
    #[serde(default)]
    alternatives: Option<Vec<RawRoute>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteResponse {
    #[serde(flatten)]
    ranking: RankedRoutes,
    geometries: Vec<GeoJsonLineString>,
}

#[derive(Serialize)]
struct GeoJsonLineString {
    r#type: String,
    coordinates: Vec<[f64; 2]>, // [lon, lat] standard for GeoJSON
}

impl From<&RankedRoute> for GeoJsonLineString {
    fn from(route: &RankedRoute) -> Self {
        Self {
            r#type: "LineString".to_string(),
            coordinates: route.scored.route.coordinates(),
        }
    }
}

// --- Errors ---

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::MalformedRoute { .. } | Error::EmptyRoute { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::NoCandidates => StatusCode::NOT_FOUND,
            Error::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Store(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let field = match &self.0 {
            Error::Validation { field, .. } => Some(*field),
            _ => None,
        };
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string(), "field": field })),
        )
            .into_response()
    }
}

struct ApiRejection(Rejection);

impl From<Error> for ApiRejection {
    fn from(err: Error) -> Self {
        Self(Rejection::from(err))
    }
}

/// Unreadable or incomplete JSON bodies are validation failures like any other.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::Validation {
            field: "body",
            message: rejection.body_text(),
        })
}

impl IntoResponse for ApiRejection {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            RejectionKind::Invalid => StatusCode::BAD_REQUEST,
            RejectionKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(json!({ "success": false, "error": self.0.message, "field": self.0.field })),
        )
            .into_response()
    }
}

fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(json!({ "success": true, "data": data }))).into_response()
}

// --- Handlers ---

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "hazards": state.service.counts(Utc::now()),
    }))
}

async fn calculate_route(
    State(state): State<SharedState>,
    payload: Result<Json<RouteRequest>, JsonRejection>,
) -> Result<Json<RouteResponse>, ApiError> {
    let payload = json_body(payload)?;
    let origin = GeoPoint::new(payload.origin[0], payload.origin[1])?;
    let destination = GeoPoint::new(payload.destination[0], payload.destination[1])?;

    let ranking = match payload.alternatives {
        Some(raw) => state.service.rank_alternatives(&raw, payload.mode, Utc::now())?,
        None => {
            let request = DirectionsRequest {
                origin,
                destination,
                travel_mode: payload.travel_mode,
            };
            state.service.plan(request, payload.mode).await?
        }
    };

    let geometries = ranking.routes.iter().map(GeoJsonLineString::from).collect();
    Ok(Json(RouteResponse {
        ranking,
        geometries,
    }))
}

async fn report_danger(
    State(state): State<SharedState>,
    payload: Result<Json<DangerReport>, JsonRejection>,
) -> Result<Response, ApiRejection> {
    let report = json_body(payload)?;
    state
        .service
        .report_danger(report)
        .map(created)
        .map_err(ApiRejection)
}

async fn report_crowd(
    State(state): State<SharedState>,
    payload: Result<Json<CrowdSubmission>, JsonRejection>,
) -> Result<Response, ApiRejection> {
    let report = json_body(payload)?;
    state
        .service
        .report_crowd(report)
        .map(created)
        .map_err(ApiRejection)
}

async fn add_event(
    State(state): State<SharedState>,
    payload: Result<Json<EventSubmission>, JsonRejection>,
) -> Result<Response, ApiRejection> {
    let event = json_body(payload)?;
    state
        .service
        .add_event(event)
        .map(created)
        .map_err(ApiRejection)
}

async fn expire_danger(
    State(state): State<SharedState>,
    Path(id): Path<HazardId>,
) -> Result<StatusCode, ApiRejection> {
    state
        .service
        .expire_danger_zone(id)
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(ApiRejection)
}

async fn list_dangers(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.list_danger_zones(Utc::now()))
}

async fn list_crowds(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.list_crowd_reports(Utc::now()))
}

async fn list_events(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.list_events())
}

async fn today_events(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.query_today_events())
}
