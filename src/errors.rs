use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EdgeError {
    #[error("Missing API key")]
    #[diagnostic(
        code(warrant_edge::config::missing_api_key),
        help("Set `upstream.api_key` in the config file or EDGE__UPSTREAM__API_KEY in the environment")
    )]
    MissingApiKey,

    #[error("Invalid polling frequency {seconds}s (cannot be < {minimum}s)")]
    #[diagnostic(
        code(warrant_edge::config::polling_frequency),
        help("Raise `upstream.polling_frequency` or switch `upstream.update_strategy` to STREAMING")
    )]
    InvalidPollingFrequency { seconds: u64, minimum: u64 },

    #[error("Error making request to upstream: {0}")]
    #[diagnostic(code(warrant_edge::upstream::http))]
    Http(#[from] reqwest::Error),

    #[error("Received HTTP {status} from upstream: {body}")]
    #[diagnostic(code(warrant_edge::upstream::status))]
    UpstreamStatus { status: u16, body: String },

    #[error("Received invalid warrant snapshot from upstream")]
    #[diagnostic(code(warrant_edge::upstream::snapshot))]
    InvalidSnapshot(#[source] serde_json::Error),

    #[error("Invalid data for event `{kind}`")]
    #[diagnostic(code(warrant_edge::upstream::event))]
    InvalidEvent {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Redis error: {0}")]
    #[diagnostic(code(warrant_edge::redis))]
    Redis(#[from] redis::RedisError),

    #[error("Unable to connect to redis at {host}:{port}")]
    #[diagnostic(
        code(warrant_edge::redis::connect),
        help("Check datastore.redis hostname, port and credentials")
    )]
    RedisConnect {
        host: String,
        port: u16,
        #[source]
        source: redis::RedisError,
    },

    #[error("Unable to acquire lock to remove {key} from cache")]
    #[diagnostic(code(warrant_edge::redis::write_conflict))]
    WriteConflict { key: String },

    #[error("Edge cache not ready")]
    #[diagnostic(code(warrant_edge::cache_not_ready))]
    CacheNotReady,

    #[error("Invalid request body: {0}")]
    #[diagnostic(code(warrant_edge::request::invalid_request))]
    InvalidRequest(String),

    #[error("Invalid parameter {parameter}, {message}")]
    #[diagnostic(code(warrant_edge::request::invalid_parameter))]
    InvalidParameter {
        parameter: &'static str,
        message: &'static str,
    },

    #[error("Missing required parameter {0}")]
    #[diagnostic(code(warrant_edge::request::missing_parameter))]
    MissingParameter(&'static str),

    #[error("Gave up reconnecting to upstream after {attempts} attempts")]
    #[diagnostic(code(warrant_edge::upstream::reconnect))]
    ReconnectExhausted { attempts: u32 },
}

impl EdgeError {
    /// Wire tag used in the `code` field of error envelopes.
    pub fn tag(&self) -> &'static str {
        match self {
            EdgeError::CacheNotReady => "cache_not_ready",
            EdgeError::InvalidRequest(_) => "invalid_request",
            EdgeError::InvalidParameter { .. } => "invalid_parameter",
            EdgeError::MissingParameter(_) => "missing_required_parameter",
            _ => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EdgeError::CacheNotReady => StatusCode::SERVICE_UNAVAILABLE,
            EdgeError::InvalidRequest(_)
            | EdgeError::InvalidParameter { .. }
            | EdgeError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            EdgeError::InvalidParameter { parameter, message } => json!({
                "code": self.tag(),
                "message": message,
                "parameter": parameter,
            }),
            EdgeError::MissingParameter(parameter) => json!({
                "code": self.tag(),
                "message": self.to_string(),
                "parameter": parameter,
            }),
            _ => json!({ "code": self.tag(), "message": self.to_string() }),
        };
        if status.is_server_error() && !matches!(self, EdgeError::CacheNotReady) {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}
