//! HTTP surface of the query service.
//!
//! The model and the index are loaded once before the listener starts and are
//! shared read-only by every request. If either fails to load the server still
//! comes up, answers `/health`, and rejects queries with a 500.

use crate::config::{QueryConfig, ServerConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{ErrorKind, FinderError, Result};
use crate::paths::PathResolver;
use crate::query::{QueryEngine, SimilarityResponse};
use crate::store::IndexStore;
use crate::utils::decode_oriented;
use crate::vision::VisionEmbedder;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub type SharedEmbedder = Box<dyn EmbeddingProvider + Send>;

const NOT_LOADED: &str = "Model or index not loaded";

/// Process-wide state, built once at startup and never mutated afterwards.
pub struct AppState {
    engine: Option<QueryEngine>,
    embedder: Option<Mutex<SharedEmbedder>>,
    resolver: PathResolver,
    query: QueryConfig,
}

impl AppState {
    #[must_use]
    pub fn new(
        engine: Option<QueryEngine>,
        embedder: Option<SharedEmbedder>,
        resolver: PathResolver,
        query: QueryConfig,
    ) -> Self {
        Self {
            engine,
            embedder: embedder.map(Mutex::new),
            resolver,
            query,
        }
    }

    /// Load the model and the index described by `config`. Failures are
    /// logged and leave the corresponding slot empty.
    #[must_use]
    pub fn load(config: &ServerConfig) -> Self {
        let embedder = match VisionEmbedder::from_source(&config.model) {
            Ok(embedder) => Some(Box::new(embedder) as SharedEmbedder),
            Err(e) => {
                error!("Failed to load model: {e}");
                None
            }
        };

        let mut engine = match IndexStore::load(&config.index_dir) {
            Ok(store) => Some(QueryEngine::new(Arc::new(store), config.query.clone())),
            Err(e) => {
                error!("Failed to load index: {e}");
                None
            }
        };

        if let (Some(embedder), Some(query_engine)) = (&embedder, &engine) {
            let store = query_engine.store();
            if embedder.dim() != store.dim() {
                error!(
                    "Model produces {}-dimensional embeddings but the index holds {}-dimensional vectors",
                    embedder.dim(),
                    store.dim()
                );
                engine = None;
            } else {
                info!("Model and index loaded successfully ({} images)", store.len());
            }
        }

        let resolver = PathResolver::new(&config.image_base, config.legacy_base_paths.clone());
        Self::new(engine, embedder, resolver, config.query.clone())
    }

    #[must_use]
    pub fn index_size(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.store().len())
    }

    fn is_ready(&self) -> bool {
        self.engine.is_some() && self.embedder.is_some()
    }

    /// Decode, embed and rank one uploaded image. Blocking.
    fn query_upload(&self, bytes: &[u8], top_k: usize) -> Result<SimilarityResponse> {
        let (Some(engine), Some(embedder)) = (&self.engine, &self.embedder) else {
            return Err(FinderError::IndexUnavailable(NOT_LOADED.into()));
        };
        let image = decode_oriented(bytes)?;
        let mut embedder = embedder
            .lock()
            .map_err(|_| FinderError::Inference("embedder lock poisoned".into()))?;
        engine.find_similar_image(&mut **embedder, image, top_k)
    }
}

/// Error wrapper that renders a [`FinderError`] as a JSON HTTP response.
#[derive(Debug)]
pub struct ApiError(pub FinderError);

impl<E: Into<FinderError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self.0.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, self.0.to_string()),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Image not found".to_owned()),
            ErrorKind::Internal => {
                error!("Error processing request: {}", self.0);
                let detail = match &self.0 {
                    FinderError::IndexUnavailable(msg) => msg.clone(),
                    _ => "Error processing image".to_owned(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub index_loaded: bool,
    pub index_size: usize,
}

#[derive(Debug, Deserialize)]
struct FindSimilarParams {
    top_k: Option<i64>,
}

struct Upload {
    filename: Option<String>,
    bytes: Bytes,
}

pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/find_similar", post(find_similar))
        .route("/image/{*path}", get(serve_image))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Image Similarity Finder API", "status": "running" }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: if state.is_ready() { "healthy" } else { "degraded" }.to_owned(),
        model_loaded: state.embedder.is_some(),
        index_loaded: state.engine.is_some(),
        index_size: state.index_size(),
    })
}

async fn find_similar(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FindSimilarParams>,
    multipart: Multipart,
) -> std::result::Result<Json<SimilarityResponse>, ApiError> {
    if !state.is_ready() {
        return Err(FinderError::IndexUnavailable(NOT_LOADED.into()).into());
    }
    let default_top_k = i64::try_from(state.query.default_top_k).unwrap_or(i64::MAX);
    let top_k = state
        .query
        .check_top_k(params.top_k.unwrap_or(default_top_k))?;

    let upload = read_upload(multipart).await?;
    let worker_state = Arc::clone(&state);
    let bytes = upload.bytes;
    let mut response = tokio::task::spawn_blocking(move || worker_state.query_upload(&bytes, top_k))
        .await
        .map_err(|e| FinderError::Inference(format!("query task failed: {e}")))??;

    response.query_image = upload.filename;
    Ok(Json(response))
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        FinderError::InvalidRequest(format!("malformed upload: {e}"))
    };
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() == Some("file") {
            let filename = field.file_name().map(str::to_owned);
            let bytes = field.bytes().await.map_err(bad_request)?;
            return Ok(Upload { filename, bytes });
        }
    }
    Err(FinderError::InvalidRequest(
        "missing multipart field 'file'".into(),
    ))
}

async fn serve_image(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
) -> std::result::Result<Response, ApiError> {
    let resolved = state.resolver.resolve(&path)?;
    let bytes = tokio::fs::read(&resolved).await?;
    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}

/// Load model and index, then serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let load_config = config.clone();
    let state = tokio::task::spawn_blocking(move || AppState::load(&load_config))
        .await
        .map_err(|e| FinderError::Inference(format!("startup task failed: {e}")))?;
    let app = router(Arc::new(state), &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting server on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
