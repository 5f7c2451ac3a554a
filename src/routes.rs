use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::Method,
    routing::{get, post},
    Json,
    Router,
};
use futures::StreamExt;
use ingest::{ByteSource, FileIngestor, IngestStrategy};
use state_store::FileMetadataStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::http_objects::{ApiError, ByNameQuery, File};

#[derive(OpenApi)]
#[openapi(
        paths(
            upload_files,
            upload_files_buffered,
            upload_files_stream,
            list_files,
            get_file_by_id,
            get_file_by_name,
        ),
        components(
            schemas(
                ApiError,
                File,
                UploadBody,
            )
        ),
        tags(
            (name = "filestore", description = "File storage API")
        )
    )]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub ingestor: Arc<FileIngestor>,
    pub metadata_store: Arc<FileMetadataStore>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route(
            "/api/v1/files",
            get(list_files).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/files/upload",
            post(upload_files).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/files/upload/input-stream",
            post(upload_files_buffered).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/files/upload/stream",
            post(upload_files_stream).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/files/by-name",
            get(get_file_by_name).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/files/{id}",
            get(get_file_by_id).with_state(route_state.clone()),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadBody {
    #[schema(format = "binary")]
    /// Files to upload
    files: Option<String>,
}

/// One ingestion per multipart field named `files`; fields are consumed
/// sequentially in body order. A failing item fails the request, items
/// already persisted stay visible.
async fn ingest_multipart(
    state: RouteState,
    mut files: Multipart,
    strategy: IngestStrategy,
) -> Result<Json<Vec<File>>, ApiError> {
    let mut results = Vec::new();
    while let Some(field) = files
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(&e.to_string()))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::bad_request("file name is required"))?;
        let source = ByteSource::Stream(
            field
                .map(|chunk| chunk.map_err(|err| anyhow!(err)))
                .boxed(),
        );
        let metadata = state.ingestor.ingest(&file_name, source, strategy).await?;
        results.push(metadata.into());
    }
    Ok(Json(results))
}

/// Upload files, spooling each one through a temp file before it is
/// checksummed and stored
#[utoipa::path(
    post,
    path = "/api/v1/files/upload",
    request_body(content_type = "multipart/form-data", content = inline(UploadBody)),
    tag = "filestore",
    responses(
        (status = 200, description = "metadata of the uploaded files", body = Vec<File>),
        (status = 400, description = "bad request"),
        (status = INTERNAL_SERVER_ERROR, description = "unable to store the files")
    ),
)]
async fn upload_files(
    State(state): State<RouteState>,
    files: Multipart,
) -> Result<Json<Vec<File>>, ApiError> {
    ingest_multipart(state, files, IngestStrategy::Spooled).await
}

/// Upload files, buffering each one fully in memory
#[utoipa::path(
    post,
    path = "/api/v1/files/upload/input-stream",
    request_body(content_type = "multipart/form-data", content = inline(UploadBody)),
    tag = "filestore",
    responses(
        (status = 200, description = "metadata of the uploaded files", body = Vec<File>),
        (status = 400, description = "bad request"),
        (status = INTERNAL_SERVER_ERROR, description = "unable to store the files")
    ),
)]
async fn upload_files_buffered(
    State(state): State<RouteState>,
    files: Multipart,
) -> Result<Json<Vec<File>>, ApiError> {
    ingest_multipart(state, files, IngestStrategy::Buffered).await
}

/// Upload files, checksumming and storing each chunk as it arrives
#[utoipa::path(
    post,
    path = "/api/v1/files/upload/stream",
    request_body(content_type = "multipart/form-data", content = inline(UploadBody)),
    tag = "filestore",
    responses(
        (status = 200, description = "metadata of the uploaded files", body = Vec<File>),
        (status = 400, description = "bad request"),
        (status = INTERNAL_SERVER_ERROR, description = "unable to store the files")
    ),
)]
async fn upload_files_stream(
    State(state): State<RouteState>,
    files: Multipart,
) -> Result<Json<Vec<File>>, ApiError> {
    ingest_multipart(state, files, IngestStrategy::Chunked).await
}

/// List all stored files, in insertion order
#[utoipa::path(
    get,
    path = "/api/v1/files",
    tag = "filestore",
    responses(
        (status = 200, description = "metadata of all stored files", body = Vec<File>),
        (status = INTERNAL_SERVER_ERROR, description = "unable to list files")
    ),
)]
async fn list_files(State(state): State<RouteState>) -> Result<Json<Vec<File>>, ApiError> {
    let files = state
        .metadata_store
        .all_files()
        .map_err(ApiError::internal_error)?;
    Ok(Json(files.into_iter().map(File::from).collect()))
}

/// Get file metadata by id
#[utoipa::path(
    get,
    path = "/api/v1/files/{id}",
    tag = "filestore",
    params(("id" = u64, Path, description = "id assigned at upload")),
    responses(
        (status = 200, description = "metadata of the file", body = File),
        (status = 404, description = "no file with this id"),
        (status = INTERNAL_SERVER_ERROR, description = "unable to query files")
    ),
)]
async fn get_file_by_id(
    State(state): State<RouteState>,
    Path(id): Path<u64>,
) -> Result<Json<File>, ApiError> {
    let metadata = state
        .metadata_store
        .file_by_id(id)
        .map_err(ApiError::internal_error)?
        .ok_or_else(|| ApiError::not_found(&format!("no file with id {}", id)))?;
    Ok(Json(metadata.into()))
}

/// Get file metadata by name; first match wins if names are not unique
#[utoipa::path(
    get,
    path = "/api/v1/files/by-name",
    tag = "filestore",
    params(ByNameQuery),
    responses(
        (status = 200, description = "metadata of the file", body = File),
        (status = 404, description = "no file with this name"),
        (status = INTERNAL_SERVER_ERROR, description = "unable to query files")
    ),
)]
async fn get_file_by_name(
    State(state): State<RouteState>,
    Query(query): Query<ByNameQuery>,
) -> Result<Json<File>, ApiError> {
    let metadata = state
        .metadata_store
        .file_by_name(&query.file_name)
        .map_err(ApiError::internal_error)?
        .ok_or_else(|| ApiError::not_found(&format!("no file named {}", query.file_name)))?;
    Ok(Json(metadata.into()))
}
