use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use std::fmt::Debug;

#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Malformed submission input; rejected synchronously, no job created.
    Validation(String),
    NotFound(String),
    /// Download attempted on a job whose artifact does not (or no longer) exist.
    NotDownloadable(String),
    /// Report Generator failure; resolves the affected job to Failed.
    Execution(String),
    /// Blob store failure during purge or artifact access.
    Store(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_type: String,
    message: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {msg}"),
            AppError::NotFound(msg) => write!(f, "Not Found error: {msg}"),
            AppError::NotDownloadable(msg) => write!(f, "Not downloadable: {msg}"),
            AppError::Execution(msg) => write!(f, "Execution error: {msg}"),
            AppError::Store(msg) => write!(f, "Store error: {msg}"),
            AppError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Validation(msg) => ("validation_error", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::NotDownloadable(msg) => ("not_downloadable", msg),
            AppError::Execution(msg) => ("execution_error", msg),
            AppError::Store(msg) => ("store_error", msg),
            AppError::Internal(msg) => ("internal_error", msg),
        };

        let error_response = ErrorResponse {
            error: "request_failed".to_string(),
            error_type: error_type.to_string(),
            message: message.clone(),
        };

        match self {
            AppError::Validation(_) => HttpResponse::BadRequest().json(error_response),
            AppError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            AppError::NotDownloadable(_) => HttpResponse::Conflict().json(error_response),
            AppError::Execution(_) => HttpResponse::BadGateway().json(error_response),
            AppError::Store(_) => HttpResponse::InternalServerError().json(error_response),
            AppError::Internal(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
