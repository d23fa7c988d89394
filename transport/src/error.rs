use thiserror::Error;

/// How callers branch on a failed request.
///
/// Only "the resource does not exist" is actionable on its own; everything
/// else (including timeouts) is treated as transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Other,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("resource not found: {locator}")]
    NotFound { locator: String },

    #[error("request timed out: {locator}")]
    Timeout { locator: String },

    #[error("HTTP {status} from {locator}: {body}")]
    Status {
        locator: String,
        status: u16,
        body: String,
    },

    #[error("connection error for {locator}: {source}")]
    Connection {
        locator: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {locator}: {source}")]
    Decode {
        locator: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid locator {locator}: {reason}")]
    InvalidLocator { locator: String, reason: String },
}

impl TransportError {
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotFound { .. } => FailureKind::NotFound,
            _ => FailureKind::Other,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.failure_kind(), FailureKind::NotFound)
    }

    /// Human-readable reason, preferring the server's own `detail` or
    /// `message` field when the error body carries one.
    #[must_use]
    pub fn detail(&self) -> String {
        if let Self::Status { body, status, .. } = self {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
                && let Some(text) = value
                    .get("detail")
                    .or_else(|| value.get("message"))
                    .and_then(serde_json::Value::as_str)
            {
                return text.to_string();
            }
            if body.trim().is_empty() {
                return format!("HTTP {status}");
            }
            return body.clone();
        }
        self.to_string()
    }
}
