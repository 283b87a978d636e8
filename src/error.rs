use std::future::Future;
use std::time::Duration;

use diesel::result::DatabaseErrorKind;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Cancelled(String),
    #[error("{0:#}")]
    Storage(anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Cancelled(_) => "CANCELLED",
            Error::Storage(_) => "STORAGE",
        }
    }
}

impl From<diesel::result::Error> for Error {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => Error::NotFound("Record not found".to_string()),
            diesel::result::Error::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => Error::Conflict(message),
                    DatabaseErrorKind::ForeignKeyViolation => Error::NotFound(message),
                    DatabaseErrorKind::CheckViolation | DatabaseErrorKind::NotNullViolation => {
                        Error::InvalidInput(message)
                    }
                    _ => Error::Storage(anyhow::Error::new(
                        diesel::result::Error::DatabaseError(kind, info),
                    )),
                }
            }
            error => Error::Storage(error.into()),
        }
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for Error {
    fn from(error: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        Error::Storage(anyhow::Error::new(error).context("Couldn't get a database connection"))
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Storage(error)
    }
}

pub trait WithContext<T> {
    fn context(self, context: &'static str) -> Self;
}

impl<T> WithContext<T> for Result<T> {
    fn context(self, context: &'static str) -> Self {
        self.map_err(|error| match error {
            Error::Storage(source) => Error::Storage(source.context(context)),
            other => other,
        })
    }
}

/// Runs `fut` under `deadline`. Dropping the inner future aborts its queries,
/// and an interrupted transaction never commits.
pub async fn within<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Cancelled(format!(
            "Operation exceeded its {}ms deadline",
            deadline.as_millis()
        ))),
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub error: anyhow::Error,
    pub status: Status,
    pub code: &'static str,
}

impl ApiError {
    pub fn new(status: Status, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: anyhow::anyhow!(message.into()),
            status,
            code,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match error {
            Error::NotFound(_) => Status::NotFound,
            Error::Conflict(_) => Status::Conflict,
            Error::InvalidInput(_) => Status::BadRequest,
            Error::Cancelled(_) => Status::GatewayTimeout,
            Error::Storage(_) => Status::InternalServerError,
        };
        let code = error.code();

        Self {
            error: error.into(),
            status,
            code,
        }
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for ApiError {
    fn from(error: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        Error::from(error).into()
    }
}

pub trait WithStatus<T> {
    fn status(self, status: Status, code: &'static str) -> ApiResult<T>;
}

impl<T> WithStatus<T> for Result<T> {
    fn status(self, status: Status, code: &'static str) -> ApiResult<T> {
        self.map_err(|error| ApiError {
            error: error.into(),
            status,
            code,
        })
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl Responder<'_, 'static> for ApiError {
    fn respond_to(self, request: &Request<'_>) -> response::Result<'static> {
        if self.status.code >= 500 {
            tracing::error!(
                method = %request.method(),
                uri = %request.uri(),
                error = ?self.error,
                "Request failed"
            );
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: format!("{:#}", self.error),
            },
        };

        (self.status, Json(body)).respond_to(request)
    }
}
