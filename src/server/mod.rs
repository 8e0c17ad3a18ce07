//! Axum HTTP server exposing the survey API.
//!
//! Routes mirror the operation table of the service layer; errors map to
//! HTTP statuses (404 not-found, 400 invalid input, 500 otherwise) with an
//! `{"error": "..."}` body. Uploaded brand images are served statically
//! under `/uploads`.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/upload` | Store a brand image, return its URL |
//! | POST | `/api/tests` | Create a test with brands and words |
//! | GET | `/api/tests` | List tests |
//! | GET | `/api/tests/:id` | Test with brands and words |
//! | DELETE | `/api/tests/:id` | Delete a test and everything under it |
//! | POST | `/api/tests/:id/runs` | Start a run |
//! | GET | `/api/tests/:id/runs` | List runs with trial counts |
//! | GET | `/api/tests/:id/panorama` | Aggregated matrix + avg RT |
//! | GET | `/api/tests/:id/export.csv` | Raw trial export |
//! | POST | `/api/runs/:run_id/trials` | Record a trial |
//! | POST | `/api/runs/:run_id/complete` | Complete a run |
//! | GET | `/api/runs/:run_id` | Run with ordered trials |

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::aggregate::Panorama;
use crate::api::{
    Ack, CreateTestRequest, CreatedTest, RecordTrialRequest, RunDetail, RunStarted,
    StartRunRequest, SurveyApi, UploadedAsset,
};
use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult};
use crate::storage::{RunSummary, TestDetail, TestSummary};

/// Shared application state: the service handle.
pub struct AppState {
    /// The survey service.
    pub api: SurveyApi,
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Build the router over shared state, serving uploads from `upload_dir`.
pub fn router(state: SharedState, upload_dir: &std::path::Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/upload", post(handle_upload))
        .route("/api/tests", post(handle_create_test).get(handle_list_tests))
        .route(
            "/api/tests/:id",
            get(handle_get_test).delete(handle_delete_test),
        )
        .route(
            "/api/tests/:id/runs",
            post(handle_start_run).get(handle_list_runs),
        )
        .route("/api/tests/:id/panorama", get(handle_panorama))
        .route("/api/tests/:id/export.csv", get(handle_export_csv))
        .route("/api/runs/:run_id/trials", post(handle_record_trial))
        .route("/api/runs/:run_id/complete", post(handle_complete_run))
        .route("/api/runs/:run_id", get(handle_run_detail))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(config: &Config, api: SurveyApi) -> AppResult<()> {
    let state = Arc::new(AppState { api });
    let app = router(state, &config.uploads.dir);

    let listener = tokio::net::TcpListener::bind(config.http.bind)
        .await
        .map_err(|e| AppError::Internal {
            message: format!("Failed to bind {}: {}", config.http.bind, e),
        })?;

    info!(addr = %config.http.bind, "HTTP server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal {
            message: format!("Server error: {}", e),
        })
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}

async fn handle_upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<UploadedAsset>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::InvalidInput {
            message: format!("malformed multipart body: {}", e),
        }
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        let bytes = field.bytes().await.map_err(|e| ApiError::InvalidInput {
            message: format!("failed to read upload: {}", e),
        })?;

        let url = state.api.store_asset(&filename, &bytes).await?;
        return Ok(Json(UploadedAsset { url }));
    }

    Err(ApiError::InvalidInput {
        message: "no file field in upload".to_string(),
    })
}

async fn handle_create_test(
    State(state): State<SharedState>,
    Json(request): Json<CreateTestRequest>,
) -> Result<Json<CreatedTest>, ApiError> {
    let id = state.api.create_test(request).await?;
    Ok(Json(CreatedTest { id }))
}

async fn handle_list_tests(
    State(state): State<SharedState>,
) -> Result<Json<Vec<TestSummary>>, ApiError> {
    Ok(Json(state.api.list_tests().await?))
}

async fn handle_get_test(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<TestDetail>, ApiError> {
    Ok(Json(state.api.fetch_test(id).await?))
}

async fn handle_delete_test(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Ack>, ApiError> {
    state.api.delete_test(id).await?;
    Ok(Json(Ack { ok: true }))
}

async fn handle_start_run(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<RunStarted>, ApiError> {
    let run_id = state.api.start_run(id, request).await?;
    Ok(Json(RunStarted { run_id }))
}

async fn handle_list_runs(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<RunSummary>>, ApiError> {
    Ok(Json(state.api.list_runs(id).await?))
}

async fn handle_panorama(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Panorama>, ApiError> {
    Ok(Json(state.api.panorama(id).await?))
}

async fn handle_export_csv(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let csv = state.api.export_csv(id).await?;

    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"teste-{}-resultados.csv\"", id),
        ),
    ];

    Ok((headers, csv).into_response())
}

async fn handle_record_trial(
    State(state): State<SharedState>,
    Path(run_id): Path<i64>,
    Json(request): Json<RecordTrialRequest>,
) -> Result<Json<Ack>, ApiError> {
    state.api.record_trial(run_id, request).await?;
    Ok(Json(Ack { ok: true }))
}

async fn handle_complete_run(
    State(state): State<SharedState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Ack>, ApiError> {
    state.api.complete_run(run_id).await?;
    Ok(Json(Ack { ok: true }))
}

async fn handle_run_detail(
    State(state): State<SharedState>,
    Path(run_id): Path<i64>,
) -> Result<Json<RunDetail>, ApiError> {
    Ok(Json(state.api.run_detail(run_id).await?))
}
