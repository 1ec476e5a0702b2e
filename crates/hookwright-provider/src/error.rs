use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    Connect,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServerError | Self::Timeout | Self::Connect
        )
    }
}

fn retry_marker(kind: &ErrorKind) -> &'static str {
    if kind.is_retryable() {
        " [retryable]"
    } else {
        ""
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("generation backend error ({}){}: {}", .status, retry_marker(.kind), .detail)]
    Status {
        status: StatusCode,
        kind: ErrorKind,
        detail: String,
    },
    #[error("generation backend unreachable ({:?}){}: {}", .kind, retry_marker(.kind), .message)]
    Network { kind: ErrorKind, message: String },
    #[error("generation stream failed: {0}")]
    Body(String),
    #[error("generation stream idle for {0}s")]
    Idle(u64),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

/// FastAPI reports failures as `{"detail": "..."}`; some proxies use
/// `{"error": {"message": "..."}}` or a bare `{"message": "..."}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

const MAX_RAW_DETAIL: usize = 200;

impl BackendError {
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
        let detail = parsed
            .and_then(|b| {
                b.detail
                    .map(|d| match d {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .or(b.error.map(|e| e.message))
                    .or(b.message)
            })
            .filter(|d| !d.trim().is_empty())
            .or_else(|| {
                let raw = body.trim();
                (!raw.is_empty() && !raw.starts_with('<'))
                    .then(|| raw.chars().take(MAX_RAW_DETAIL).collect())
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });

        Self::Status {
            status,
            kind: ErrorKind::from_status(status),
            detail,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Connect
        } else {
            ErrorKind::Unknown
        };
        Self::Network {
            kind,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Status { kind, .. } | Self::Network { kind, .. } => *kind,
            Self::Idle(_) => ErrorKind::Timeout,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Body(_) | Self::Decode(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
