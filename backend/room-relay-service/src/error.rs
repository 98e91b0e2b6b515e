use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use room_hub::HubError;
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    status: u16,
}

impl From<HubError> for AppError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::InvalidChannel(_) | HubError::ChannelMissing => {
                AppError::BadRequest(e.to_string())
            }
            HubError::BackendUnavailable(_) | HubError::HubClosed => {
                AppError::ServiceUnavailable(e.to_string())
            }
            HubError::DuplicateRegistration(_) => AppError::StartServer(e.to_string()),
            HubError::Transport(_) => AppError::Internal,
        }
    }
}

impl AppError {
    /// Returns whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ServiceUnavailable(_))
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::NotFound => 404,
            AppError::ServiceUnavailable(_) => 503,
            _ => 500,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound => "not_found",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            _ => "server_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = ResponseError::status_code(self);
        HttpResponse::build(status).json(ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            status: status.as_u16(),
        })
    }
}
