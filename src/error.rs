//! Typed errors and HTTP mapping.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("duplicate model: {0}")]
    DuplicateModel(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("enum '{0}' declared twice with different values")]
    EnumMismatch(String),
    #[error("model {model}: field '{field}' references unknown table '{target}'")]
    UnknownReference {
        model: String,
        field: String,
        target: String,
    },
    #[error("model {model}: read-only field '{field}' cannot be required")]
    ReadOnlyRequired { model: String, field: String },
    #[error("model {model}: unique_together on '{field}' names unknown field '{other}'")]
    UnknownUniqueTogether {
        model: String,
        field: String,
        other: String,
    },
    #[error("model {model}: field name '{field}' is reserved")]
    ReservedField { model: String, field: String },
    #[error("model {model}: column '{column}' is not shared by all union members")]
    UnionColumn { model: String, column: String },
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("settings: {0}")]
    Settings(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("could not validate credentials")]
    Unauthorized,
    #[error("token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("crypto: {0}")]
    Crypto(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl DataError {
    /// HTTP classification so the web layer above can map errors without
    /// matching variants.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            DataError::Schema(_) => (StatusCode::INTERNAL_SERVER_ERROR, "schema_error"),
            DataError::Settings(_) => (StatusCode::INTERNAL_SERVER_ERROR, "settings_error"),
            DataError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            DataError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            DataError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            DataError::Unauthorized | DataError::Token(_) => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            DataError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            DataError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }
}

impl IntoResponse for DataError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401() {
        let (status, code) = DataError::Unauthorized.status();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "unauthorized");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let (status, _) = DataError::Db(sqlx::Error::RowNotFound).status();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn schema_errors_are_internal() {
        let err = DataError::Schema(SchemaError::DuplicateModel("User".into()));
        assert_eq!(err.status().0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
