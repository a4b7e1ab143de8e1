//! Error taxonomy shared by the server and the indexer.
//!
//! Handlers return `Result<_, Error>`; the [`IntoResponse`] impl turns
//! every variant into the `{"error": "<message>"}` payload the API
//! promises, with the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied parameter failed validation (HTTP 400).
    #[error("{0}")]
    InvalidInput(String),

    /// Requested record does not exist (HTTP 404).
    #[error("{0}")]
    NotFound(&'static str),

    /// Storage backend failure (HTTP 500).
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// PDF could not be opened or read.
    #[error("pdf failure: {0}")]
    Pdf(String),

    /// Page rasterization failure (HTTP 500).
    #[error("raster failure: {0}")]
    Raster(String),

    /// The generative-model endpoint failed; callers degrade to a null
    /// summary rather than surfacing this.
    #[error("upstream model failure: {0}")]
    Upstream(String),

    /// The indexer cannot make progress.
    #[error("indexing failure: {0}")]
    Indexing(String),

    /// Response shaping failed (HTTP 500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Storage(_)
            | Error::Pdf(_)
            | Error::Raster(_)
            | Error::Upstream(_)
            | Error::Indexing(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
