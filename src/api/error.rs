use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// JSON body returned alongside every non-2xx operator API response.
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Error type shared by every operator API handler (§6 "operator HTTP
/// API"). Handlers return `Result<T, AppError>`; axum converts the `Err`
/// arm into a JSON body via [`IntoResponse`].
pub enum AppError {
    NotFound,
    Validation(String),
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "attack_not_found",
            AppError::Validation(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn message(self) -> String {
        match self {
            AppError::NotFound => "no matching host or attack UUID".to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = ApiErrorBody {
            code,
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
