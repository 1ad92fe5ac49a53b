//! HTTP surface for the extraction server.
//!
//! - `GET /` – Liveness probe returning `{"message": "Server is running"}`.
//! - `POST /process` – Multipart upload of one or more documents. Every file part is staged,
//!   extracted, and structured; the response is the ordered array of records, each carrying
//!   `fileName`. Any failure yields `500` with `{"detail", "fileName", "stage"}` and no records.
//! - `GET /metrics` – Batch, file, and wipe counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools.
//!
//! The `/process` response body owns the batch's [`WipeTicket`], so the output artifact is
//! wiped only after the payload has been handed to the transport (or the client went away).

use crate::config::Config;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{PipelineApi, ProcessedBatch, ProcessingError, UploadedFile, WipeTicket};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router exposing the pipeline.
pub fn create_router<P>(pipeline: Arc<P>) -> Router
where
    P: PipelineApi + 'static,
{
    Router::new()
        .route("/", get(root))
        .route("/process", post(process_files::<P>))
        .route("/metrics", get(get_metrics::<P>))
        .route("/commands", get(get_commands))
        .with_state(pipeline)
}

/// Wrap a router with the upload size limit, CORS policy, and request tracing.
pub fn apply_http_layers(router: Router, config: &Config) -> Router {
    router
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) if value != "*" => Some(value),
            _ => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Credentials rule out wildcards, so methods and headers mirror the preflight.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Server is running" }))
}

/// Stage, extract, and structure every uploaded file, returning the ordered records.
async fn process_files<P>(
    State(pipeline): State<Arc<P>>,
    mut multipart: Multipart,
) -> Result<Response, AppError>
where
    P: PipelineApi,
{
    let files = collect_uploads(&mut multipart).await?;
    let ProcessedBatch {
        batch_id,
        records,
        wipe,
    } = pipeline.process(files).await?;

    let payload = serde_json::to_vec(&records).map_err(AppError::Encode)?;
    tracing::info!(
        %batch_id,
        records = records.len(),
        bytes = payload.len(),
        "Process request completed"
    );
    Ok(wipe_after_send(payload, wipe))
}

async fn collect_uploads(multipart: &mut Multipart) -> Result<Vec<UploadedFile>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.file_name().map(str::to_string) else {
            tracing::debug!(field = ?field.name(), "Skipping non-file form field");
            continue;
        };
        let content = field.bytes().await?;
        tracing::debug!(file = %name, bytes = content.len(), "Received upload");
        files.push(UploadedFile { name, content });
    }
    Ok(files)
}

/// JSON response whose body queues the artifact wipe once it has been sent or dropped.
fn wipe_after_send(payload: Vec<u8>, wipe: WipeTicket) -> Response {
    let body = async_stream::stream! {
        let _wipe = wipe;
        yield Ok::<_, Infallible>(Bytes::from(payload));
    };
    (
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn get_metrics<P>(State(pipeline): State<Arc<P>>) -> Json<MetricsSnapshot>
where
    P: PipelineApi,
{
    Json(pipeline.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/",
                description: "Liveness probe. Returns { \"message\": \"Server is running\" }.",
            },
            CommandDescriptor {
                name: "process",
                method: "POST",
                path: "/process",
                description: "Multipart upload of one or more documents (PDF or plain text). Returns an array with one structured record per file, in upload order, each including \"fileName\".",
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return batch, file, and output-wipe counters.",
            },
        ],
    })
}

enum AppError {
    Upload(MultipartError),
    Processing(ProcessingError),
    Encode(serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Upload(error) => {
                tracing::warn!(error = %error, "Rejected malformed upload");
                (error.status(), Json(json!({ "detail": error.body_text() }))).into_response()
            }
            AppError::Processing(error) => {
                let mut body = json!({
                    "detail": error.to_string(),
                    "stage": error.stage(),
                });
                if let Some(file_name) = error.file_name() {
                    body["fileName"] = json!(file_name);
                }
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            AppError::Encode(error) => {
                tracing::error!(error = %error, "Failed to encode response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Failed to encode response" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<ProcessingError> for AppError {
    fn from(inner: ProcessingError) -> Self {
        Self::Processing(inner)
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::Upload(inner)
    }
}
