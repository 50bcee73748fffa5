//! Application error types and handling

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout exceeded: {0}")]
    Timeout(String),

    #[error("Upstream error: {kind} - {reason}")]
    Engine { kind: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// HTTP status this error is surfaced with
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Engine { .. } => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".into()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Map a transport-level failure talking to the engine or the pipeline.
pub fn translate_transport(err: reqwest::Error, timeout: Duration) -> AppError {
    if err.is_timeout() {
        return AppError::Timeout(format!("{:?}", timeout));
    }
    if err.is_connect() {
        return AppError::Connection(err.to_string());
    }
    if err.is_decode() {
        return AppError::Parse(err.to_string());
    }
    AppError::Connection(err.to_string())
}

#[derive(Debug, Deserialize)]
struct EngineErrorBody {
    error: Option<EngineErrorDetail>,
    found: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EngineErrorDetail {
    Structured {
        #[serde(rename = "type")]
        kind: String,
        reason: Option<String>,
    },
    Plain(String),
}

/// Map a non-success engine response into the error taxonomy.
///
/// A 404 without a structured error (or with `found: false`) is a missing
/// document; `index_not_found_exception` is also reported as NotFound.
pub fn translate_engine_response(status: u16, body: &str) -> AppError {
    let parsed: Option<EngineErrorBody> = serde_json::from_str(body).ok();

    match parsed {
        Some(EngineErrorBody {
            error: Some(EngineErrorDetail::Structured { kind, reason }),
            ..
        }) => {
            let reason = reason.unwrap_or_else(|| "no reason given".to_string());
            if kind == "index_not_found_exception" {
                AppError::NotFound(reason)
            } else {
                AppError::Engine { kind, reason }
            }
        }
        Some(EngineErrorBody {
            error: Some(EngineErrorDetail::Plain(reason)),
            ..
        }) if status != 404 => AppError::Engine {
            kind: format!("http_{}", status),
            reason,
        },
        Some(EngineErrorBody { found: Some(false), .. }) => {
            AppError::NotFound("document not found".into())
        }
        _ if status == 404 => AppError::NotFound("document not found".into()),
        _ => AppError::Engine {
            kind: format!("http_{}", status),
            reason: body.chars().take(256).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_engine_error_keeps_type_and_reason() {
        let body = r#"{"error":{"type":"parsing_exception","reason":"unknown query [mach]"},"status":400}"#;
        let err = translate_engine_response(400, body);

        match &err {
            AppError::Engine { kind, reason } => {
                assert_eq!(kind, "parsing_exception");
                assert_eq!(reason, "unknown query [mach]");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "Upstream error: parsing_exception - unknown query [mach]"
        );
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_index_is_not_found() {
        let body = r#"{"error":{"type":"index_not_found_exception","reason":"no such index [x]"},"status":404}"#;
        assert!(matches!(
            translate_engine_response(404, body),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn bare_404_is_not_found() {
        assert!(matches!(
            translate_engine_response(404, r#"{"_id":"a","found":false}"#),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            translate_engine_response(404, ""),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn unparsable_body_becomes_http_engine_error() {
        let err = translate_engine_response(503, "upstream unavailable");
        match err {
            AppError::Engine { kind, reason } => {
                assert_eq!(kind, "http_503");
                assert_eq!(reason, "upstream unavailable");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn client_and_server_errors_map_to_statuses() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Timeout("30s".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::Connection("refused".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
