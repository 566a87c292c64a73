use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    UnknownProduct,
    UserCancelled,
    PaymentFailed,
    RateLimited,
    Transport,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Validation => "validation",
            ErrorCode::UnknownProduct => "unknown_product",
            ErrorCode::UserCancelled => "user_cancelled",
            ErrorCode::PaymentFailed => "payment_failed",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Transport => "transport",
            ErrorCode::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// A single attribute the backend refused, e.g. `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error body as sent by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: Vec::new(),
        }
    }
}

/// Failure surfaced by the bridge, carrying the backend detail unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
    pub fields: Vec<FieldError>,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.fields = fields;
        self
    }

    pub fn is_user_cancellation(&self) -> bool {
        self.code == ErrorCode::UserCancelled
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }
}

impl From<ApiError> for BackendError {
    fn from(value: ApiError) -> Self {
        Self {
            code: value.code,
            message: value.message,
            fields: value.fields,
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(value: BackendError) -> Self {
        Self {
            code: value.code,
            message: value.message,
            fields: value.fields,
        }
    }
}
