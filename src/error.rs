use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("authentication failure: {0}")]
    Authentication(String),

    #[error("not a member of project {0}")]
    Authorization(Uuid),

    #[error("not joined to room {0}")]
    NotInRoom(Uuid),

    #[error("validation failure: {0}")]
    Validation(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),
}

impl AppError {
    /// Stable wire code carried in acknowledgment error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Authentication(_) => "AuthenticationFailure",
            AppError::Authorization(_) => "AuthorizationFailure",
            AppError::NotInRoom(_) => "NotInRoom",
            AppError::Validation(_) => "ValidationFailure",
            AppError::Persistence(_) => "PersistenceFailure",
            AppError::Config(_) | AppError::StartServer(_) => "InternalError",
        }
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Persistence(e.to_string())
    }
}
