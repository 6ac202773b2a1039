use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use policy_extract::ExtractError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// What a caller may learn about a failed request.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("model backend unavailable")]
    Backend,

    #[error("model returned an unusable response")]
    MalformedResponse,

    #[error("internal server error")]
    Internal,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Backend => "BACKEND_ERROR",
            ApiError::MalformedResponse => "MALFORMED_RESPONSE",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, ApiError::BadRequest(_))
    }
}

/// Full detail goes to the server log; the caller only sees the mapped variant.
impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::InputTooLarge { length, limit } => ApiError::BadRequest(format!(
                "Too many characters: {length} (must be fewer than {limit})"
            )),
            ExtractError::UnsupportedMimeType(mime) => {
                ApiError::BadRequest(format!("Invalid file type: {mime}"))
            }
            backend @ ExtractError::Backend(_) => {
                error!(error = %backend, "Extraction failed in model backend");
                ApiError::Backend
            }
            malformed @ ExtractError::MalformedResponse(_) => {
                error!(error = %malformed, "Extraction failed on model output");
                ApiError::MalformedResponse
            }
            other => {
                error!(error = %other, "Extraction failed");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid multipart body: {err}"))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
