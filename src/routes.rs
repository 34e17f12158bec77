//! HTTP boundary over the catalog.
//!
//! Every handler pushes its catalog work onto the blocking pool; the store
//! and the filesystem calls underneath are synchronous.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::assets::{self, RangeOutcome};
use crate::error::CatalogError;
use crate::index::scanner;
use crate::index::watcher::CatalogWatcher;
use crate::state::catalog::Catalog;
use crate::state::data::{Asset, AssetPage, MediaType, Project, ScanSummary};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub watcher: Arc<CatalogWatcher>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/root", get(get_root).patch(set_root))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{project_id}", patch(rename_project))
        .route("/api/projects/{project_id}/assets", get(list_assets))
        .route(
            "/api/projects/{project_id}/assets/{asset_id}",
            patch(rename_asset),
        )
        .route(
            "/api/projects/{project_id}/assets/{asset_id}/file",
            get(stream_asset),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Catalog error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(CatalogError);

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CatalogError::InvalidRoot { .. } | CatalogError::InvalidName(_) => {
                StatusCode::BAD_REQUEST
            }
            CatalogError::AlreadyExists(_) => StatusCode::CONFLICT,
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Run synchronous catalog work on the blocking pool.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CatalogError::Task(e.to_string()))?
        .map_err(ApiError::from)
}

// ========== Root ==========

#[derive(Serialize)]
struct RootResponse {
    root: String,
    watching: bool,
}

async fn get_root(State(state): State<AppState>) -> ApiResult<Json<RootResponse>> {
    let catalog = Arc::clone(&state.catalog);
    let root = blocking(move || Ok(catalog.root())).await?;
    Ok(Json(RootResponse {
        root: root.to_string_lossy().into_owned(),
        watching: state.watcher.is_running(),
    }))
}

#[derive(Deserialize)]
struct SetRootRequest {
    root: String,
}

#[derive(Serialize)]
struct SetRootResponse {
    root: String,
    scan: ScanSummary,
}

/// Validate and persist the root, resync the catalog, then make sure the
/// watcher is running. Responds only after all three.
async fn set_root(
    State(state): State<AppState>,
    Json(request): Json<SetRootRequest>,
) -> ApiResult<Json<SetRootResponse>> {
    let AppState { catalog, watcher } = state;
    let response = blocking(move || {
        let root = catalog.set_root(std::path::Path::new(&request.root))?;
        let scan = scanner::scan(&catalog)?;
        if let Err(e) = watcher.ensure_started() {
            warn!(error = %e, "watcher did not start; catalog only updates on scan");
        }
        Ok(SetRootResponse {
            root: root.to_string_lossy().into_owned(),
            scan,
        })
    })
    .await?;
    Ok(Json(response))
}

// ========== Projects ==========

#[derive(Deserialize)]
struct ProjectsQuery {
    #[serde(default)]
    refresh: bool,
}

async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ProjectsQuery>,
) -> ApiResult<Json<Vec<Project>>> {
    let catalog = state.catalog;
    let projects = blocking(move || {
        if query.refresh {
            scanner::scan(&catalog)?;
        }
        assets::list_projects(&catalog)
    })
    .await?;
    Ok(Json(projects))
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

async fn rename_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Project>> {
    let catalog = state.catalog;
    let project =
        blocking(move || assets::rename_project(&catalog, &project_id, &request.name)).await?;
    Ok(Json(project))
}

// ========== Assets ==========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetsQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_assets(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<AssetsQuery>,
) -> ApiResult<Json<AssetPage>> {
    let catalog = state.catalog;
    let page = blocking(move || {
        assets::list_assets(&catalog, &project_id, query.page, query.page_size)
    })
    .await?;
    Ok(Json(page))
}

async fn rename_asset(
    State(state): State<AppState>,
    Path((project_id, asset_id)): Path<(String, String)>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Asset>> {
    let catalog = state.catalog;
    let asset = blocking(move || {
        assets::rename_asset(&catalog, &project_id, &asset_id, &request.name)
    })
    .await?;
    Ok(Json(asset))
}

/// Stream an asset's bytes. Videos honour a single `Range`; images are
/// always sent whole.
async fn stream_asset(
    State(state): State<AppState>,
    Path((project_id, asset_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let catalog = state.catalog;
    let file = blocking(move || assets::open_asset(&catalog, &project_id, &asset_id)).await?;

    let outcome = match file.media_type {
        MediaType::Video => assets::resolve_range(
            headers.get(header::RANGE).and_then(|v| v.to_str().ok()),
            file.size,
        ),
        _ => RangeOutcome::Full,
    };

    let mut handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(CatalogError::Io)?;

    match outcome {
        RangeOutcome::Unsatisfiable => Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", file.size))],
        )
            .into_response()),
        RangeOutcome::Partial(range) => {
            handle
                .seek(SeekFrom::Start(range.start))
                .await
                .map_err(CatalogError::Io)?;
            info!(
                path = %file.path.display(),
                start = range.start,
                end = range.end,
                "serving range"
            );
            let body = Body::from_stream(ReaderStream::new(handle.take(range.len())));
            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, file.content_type.to_string()),
                    (header::CONTENT_LENGTH, range.len().to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", range.start, range.end, file.size),
                    ),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                body,
            )
                .into_response())
        }
        RangeOutcome::Full => {
            let accept_ranges = match file.media_type {
                MediaType::Video => "bytes",
                _ => "none",
            };
            let body = Body::from_stream(ReaderStream::new(handle));
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, file.content_type.to_string()),
                    (header::CONTENT_LENGTH, file.size.to_string()),
                    (header::ACCEPT_RANGES, accept_ranges.to_string()),
                ],
                body,
            )
                .into_response())
        }
    }
}
