use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong.
        message: String,
    },

    /// Storage layer failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Service operation failure.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Client-side upstream failure.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Anything that should not happen in normal operation.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening the database or creating its parent directory failed.
    #[error("Database connection failed: {message}")]
    Connection {
        /// What went wrong.
        message: String,
    },

    /// Embedded migrations could not be applied.
    #[error("Migration failed: {message}")]
    Migration {
        /// What went wrong.
        message: String,
    },

    /// Any other database error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors surfaced by the service operations to API callers.
///
/// Each variant maps to an HTTP-style status via [`ApiError::status_code`]:
/// `NotFound` is 404, `InvalidInput` is 400, everything else is 500.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A referenced test or run does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind ("test" or "run").
        entity: &'static str,
        /// The id that was looked up.
        id: i64,
    },

    /// A required field was missing or malformed on creation.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the payload.
        message: String,
    },

    /// Underlying persistence failure; multi-row creates abort whole.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Writing an uploaded asset to disk failed.
    #[error("Upload failed: {message}")]
    Upload {
        /// What went wrong.
        message: String,
    },
}

impl ApiError {
    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound { .. } => 404,
            ApiError::InvalidInput { .. } => 400,
            ApiError::Storage(_) | ApiError::Upload { .. } => 500,
        }
    }
}

/// Client-side errors when the sequencer reaches the survey API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connection refused, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Upstream {
        /// HTTP status code returned.
        status: u16,
        /// Short machine-readable message from the API.
        message: String,
    },

    /// The API answered 2xx but the body did not parse.
    #[error("Invalid response: {message}")]
    Decode {
        /// What failed to parse.
        message: String,
    },
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        ClientError::Upstream {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for service operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
