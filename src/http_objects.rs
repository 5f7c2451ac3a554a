use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ingest::IngestError;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string().as_str())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
    }
}

/// Metadata record as returned by the API. Ids are always present here;
/// records are only visible once persisted.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct File {
    pub id: u64,
    pub file_name: String,
    pub checksum: String,
    pub size: u64,
}

impl From<data_model::FileMetadata> for File {
    fn from(metadata: data_model::FileMetadata) -> Self {
        Self {
            id: metadata.id.unwrap_or_default(),
            file_name: metadata.file_name,
            checksum: metadata.checksum,
            size: metadata.size,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ByNameQuery {
    pub file_name: String,
}
