// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::auth::AuthFailure;
use crate::database::DatabaseError;
use crate::services::ServiceError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<BTreeMap<String, String>>,
    },
    InvalidJson { message: String, extra: Vec<String> },
    InvalidForm { message: String, extra: Vec<String> },
    InvalidPagination(String),
    MissingField(String),
    MissingFiles(String),
    DuplicateFile { message: String, path: String },
    IdNotInRequest(String),
    NameWrongFormat(String),

    // 401 Unauthorized
    Unauthorized(String),
    NoIdentity(String),
    UnknownUser(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound { message: String, extra: Vec<String> },
    PageNotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    DatabaseSave(String),
    DatabaseDelete(String),
    NoDatabase(String),
    CreatingDir(String),
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_)
            | ApiError::ValidationError { .. }
            | ApiError::InvalidJson { .. }
            | ApiError::InvalidForm { .. }
            | ApiError::InvalidPagination(_)
            | ApiError::MissingField(_)
            | ApiError::MissingFiles(_)
            | ApiError::DuplicateFile { .. }
            | ApiError::IdNotInRequest(_)
            | ApiError::NameWrongFormat(_) => 400,
            ApiError::Unauthorized(_) | ApiError::NoIdentity(_) | ApiError::UnknownUser(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound { .. } | ApiError::PageNotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::DatabaseSave(_)
            | ApiError::DatabaseDelete(_)
            | ApiError::NoDatabase(_)
            | ApiError::CreatingDir(_)
            | ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidPagination(msg)
            | ApiError::MissingField(msg)
            | ApiError::MissingFiles(msg)
            | ApiError::IdNotInRequest(msg)
            | ApiError::NameWrongFormat(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NoIdentity(msg)
            | ApiError::UnknownUser(msg)
            | ApiError::Forbidden(msg)
            | ApiError::PageNotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::DatabaseSave(msg)
            | ApiError::DatabaseDelete(msg)
            | ApiError::NoDatabase(msg)
            | ApiError::CreatingDir(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
            ApiError::ValidationError { message, .. }
            | ApiError::InvalidJson { message, .. }
            | ApiError::InvalidForm { message, .. }
            | ApiError::DuplicateFile { message, .. }
            | ApiError::NotFound { message, .. } => message,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson { .. } => "INVALID_JSON",
            ApiError::InvalidForm { .. } => "FORM_INVALID_VALUE",
            ApiError::InvalidPagination(_) => "INVALID_PAGINATION_REQUEST",
            ApiError::MissingField(_) => "MISSING_FIELD",
            ApiError::MissingFiles(_) => "FORM_MISSING_FILES",
            ApiError::DuplicateFile { .. } => "FORM_DUPLICATE_FILE",
            ApiError::IdNotInRequest(_) => "ID_NOT_IN_REQUEST",
            ApiError::NameWrongFormat(_) => "NAME_WRONG_FORMAT",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NoIdentity(_) => "AUTH_NO_IDENTITY",
            ApiError::UnknownUser(_) => "AUTH_NO_USER",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::PageNotFound(_) => "PAGINATION_PAGE_NOT_FOUND",
            ApiError::Conflict(_) => "RESOURCE_EXISTS",
            ApiError::DatabaseSave(_) => "DB_SAVE",
            ApiError::DatabaseDelete(_) => "DB_DELETE",
            ApiError::NoDatabase(_) => "NO_DATABASE",
            ApiError::CreatingDir(_) => "CREATING_DIR",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Extra detail strings, e.g. offending field names or file paths
    pub fn extra(&self) -> Vec<String> {
        match self {
            ApiError::InvalidJson { extra, .. }
            | ApiError::InvalidForm { extra, .. }
            | ApiError::NotFound { extra, .. } => extra.clone(),
            ApiError::DuplicateFile { path, .. } => vec![path.clone()],
            ApiError::ValidationError {
                field_errors: Some(fields),
                ..
            } => fields.iter().map(|(field, msg)| format!("{}: {}", field, msg)).collect(),
            _ => Vec::new(),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        });

        let extra = self.extra();
        if !extra.is_empty() {
            response["extra"] = json!(extra);
        }

        if let ApiError::ValidationError {
            field_errors: Some(field_errors),
            ..
        } = self
        {
            response["field_errors"] = json!(field_errors);
        }

        response
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<BTreeMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::InvalidJson {
            extra: vec![message.clone()],
            message: "Unable to decode JSON body".to_string(),
        }
    }

    pub fn invalid_form(message: impl Into<String>, extra: Vec<String>) -> Self {
        ApiError::InvalidForm {
            message: message.into(),
            extra,
        }
    }

    pub fn missing_field(message: impl Into<String>) -> Self {
        ApiError::MissingField(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            message: message.into(),
            extra: Vec::new(),
        }
    }

    pub fn not_found_with(message: impl Into<String>, extra: impl Into<String>) -> Self {
        ApiError::NotFound {
            message: message.into(),
            extra: vec![extra.into()],
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn db_save(message: impl Into<String>) -> Self {
        ApiError::DatabaseSave(message.into())
    }

    pub fn db_delete(message: impl Into<String>) -> Self {
        ApiError::DatabaseDelete(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<AuthFailure> for ApiError {
    fn from(err: AuthFailure) -> Self {
        match err {
            AuthFailure::NoIdentity => ApiError::NoIdentity("Unable to process JWT token".to_string()),
            AuthFailure::UnknownUser(identity) => {
                tracing::debug!("No user matches identity '{}'", identity);
                ApiError::UnknownUser("No user found for the given credentials".to_string())
            }
            AuthFailure::InvalidToken => ApiError::unauthorized("Invalid or expired access token"),
            AuthFailure::Store(e) => {
                tracing::error!("User lookup failed: {}", e);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConnectionError(_) | DatabaseError::ConfigMissing(_) => {
                tracing::error!("Database unavailable: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            other => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Database error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::not_found(msg),
            ServiceError::AlreadyExists(msg) => ApiError::conflict(msg),
            ServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ServiceError::Invalid(msg) => ApiError::invalid_form("Invalid value", vec![msg]),
            ServiceError::Database(e) => e.into(),
            ServiceError::Io(e) => {
                tracing::error!("Storage error: {}", e);
                ApiError::internal_server_error("Storage error occurred")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
