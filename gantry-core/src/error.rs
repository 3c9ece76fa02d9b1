// Error types for the gantry pipeline core

use crate::HttpStatus;
use thiserror::Error;

/// Boxed error raised by application code (handlers, guards, pipes).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    // Startup errors (fatal, abort initialization)
    #[error("Unresolved dependency: {0}")]
    UnresolvedDependency(String),

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Module import cycle detected: {}", .0.join(" -> "))]
    ModuleCycle(Vec<String>),

    #[error("Scope mismatch: singleton '{singleton}' depends on per-request provider '{scoped}'")]
    ScopeMismatch { singleton: String, scoped: String },

    #[error("Duplicate provider: {0}")]
    DuplicateProvider(String),

    #[error("Duplicate metadata: {0}")]
    DuplicateMetadata(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Request-time errors
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable Entity: {0}")]
    UnprocessableEntity(String),

    #[error("Request Timeout: {0}")]
    RequestTimeout(String),

    #[error("Too Many Requests: {0}")]
    TooManyRequests(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Not Implemented: {0}")]
    NotImplemented(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),

    /// An HTTP exception with an explicit status code.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request aborted")]
    Aborted,

    /// Any other condition raised by application code.
    #[error(transparent)]
    Custom(BoxError),
}

impl Error {
    /// Wrap an application error so exception filters can match it by type.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Box::new(error))
    }

    /// Create an HTTP exception with an explicit status code.
    ///
    /// Messages of 5xx exceptions are treated like any other server error
    /// and hidden from clients in production mode.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    /// Borrow the wrapped application error as a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Custom(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Stable variant name, used by exception filters for matching.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnresolvedDependency(_) => "UnresolvedDependency",
            Error::DependencyCycle(_) => "DependencyCycle",
            Error::ModuleCycle(_) => "ModuleCycle",
            Error::ScopeMismatch { .. } => "ScopeMismatch",
            Error::DuplicateProvider(_) => "DuplicateProvider",
            Error::DuplicateMetadata(_) => "DuplicateMetadata",
            Error::Configuration(_) => "Configuration",
            Error::Forbidden(_) => "Forbidden",
            Error::Validation(_) => "Validation",
            Error::BadRequest(_) => "BadRequest",
            Error::Unauthorized(_) => "Unauthorized",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::UnprocessableEntity(_) => "UnprocessableEntity",
            Error::RequestTimeout(_) => "RequestTimeout",
            Error::TooManyRequests(_) => "TooManyRequests",
            Error::Serialization(_) => "Serialization",
            Error::Internal(_) => "Internal",
            Error::NotImplemented(_) => "NotImplemented",
            Error::ServiceUnavailable(_) => "ServiceUnavailable",
            Error::Http { .. } => "Http",
            Error::Aborted => "Aborted",
            Error::Custom(_) => "Custom",
        }
    }

    /// Whether this error belongs to the startup taxonomy.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedDependency(_)
                | Error::DependencyCycle(_)
                | Error::ModuleCycle(_)
                | Error::ScopeMismatch { .. }
                | Error::DuplicateProvider(_)
                | Error::DuplicateMetadata(_)
                | Error::Configuration(_)
        )
    }

    /// Whether this error is an intentional HTTP exception whose message
    /// is safe to show to clients.
    pub fn is_http_exception(&self) -> bool {
        matches!(
            self,
            Error::Forbidden(_)
                | Error::Validation(_)
                | Error::BadRequest(_)
                | Error::Unauthorized(_)
                | Error::NotFound(_)
                | Error::Conflict(_)
                | Error::UnprocessableEntity(_)
                | Error::RequestTimeout(_)
                | Error::TooManyRequests(_)
                | Error::NotImplemented(_)
                | Error::ServiceUnavailable(_)
        ) || matches!(self, Error::Http { status, .. } if *status < 500)
    }

    /// Client-facing message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Forbidden(msg)
            | Error::Validation(msg)
            | Error::BadRequest(msg)
            | Error::Unauthorized(msg)
            | Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::UnprocessableEntity(msg)
            | Error::RequestTimeout(msg)
            | Error::TooManyRequests(msg)
            | Error::Serialization(msg)
            | Error::Internal(msg)
            | Error::NotImplemented(msg)
            | Error::ServiceUnavailable(msg) => msg.clone(),
            Error::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Forbidden(_) => HttpStatus::Forbidden.code(),
            Error::Validation(_) | Error::BadRequest(_) => HttpStatus::BadRequest.code(),
            Error::Unauthorized(_) => HttpStatus::Unauthorized.code(),
            Error::NotFound(_) => HttpStatus::NotFound.code(),
            Error::Conflict(_) => HttpStatus::Conflict.code(),
            Error::UnprocessableEntity(_) => HttpStatus::UnprocessableEntity.code(),
            Error::RequestTimeout(_) => HttpStatus::RequestTimeout.code(),
            Error::TooManyRequests(_) => HttpStatus::TooManyRequests.code(),
            Error::NotImplemented(_) => HttpStatus::NotImplemented.code(),
            Error::ServiceUnavailable(_) => HttpStatus::ServiceUnavailable.code(),
            Error::Http { status, .. } => *status,

            // Default to 500 for everything else
            _ => HttpStatus::InternalServerError.code(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
