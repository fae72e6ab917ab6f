//! Error types for the API client.
//!
//! # Design
//! Backend error codes are decoded once, when a failed response is parsed,
//! into `ErrorCode`. Only `ErrorCode::SessionExpired` drives control flow;
//! every other code is carried through to the caller untouched.
//!
//! `RenewalError` is `Clone` because one renewal outcome is handed to every
//! request that was waiting on the same renewal.

use thiserror::Error;

/// Wire value of the session-expired code.
pub const SESSION_EXPIRED_CODE: &str = "401003";

/// Backend error code extracted from a structured error body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The session credential expired; renew and retry.
    SessionExpired,
    /// Any other backend code, kept verbatim.
    Other(String),
}

impl ErrorCode {
    pub fn from_wire(code: &str) -> Self {
        if code == SESSION_EXPIRED_CODE {
            ErrorCode::SessionExpired
        } else {
            ErrorCode::Other(code.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::SessionExpired => SESSION_EXPIRED_CODE,
            ErrorCode::Other(code) => code,
        }
    }

    /// Best-effort extraction from a raw error body. Bodies that are not a
    /// JSON object or carry no `code` yield `None`. Numeric codes are accepted.
    pub fn from_body(body: &str) -> Option<Self> {
        let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
        match parsed.as_object()?.get("code")? {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self::from_wire(s)),
            serde_json::Value::Number(n) => Some(Self::from_wire(&n.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse class of an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            100..=199 => StatusCategory::Informational,
            200..=299 => StatusCategory::Success,
            300..=399 => StatusCategory::Redirection,
            400..=499 => StatusCategory::ClientError,
            500..=599 => StatusCategory::ServerError,
            _ => StatusCategory::Unknown,
        }
    }
}

/// Failure of the exchange itself: DNS, connect, TLS, transport timeout.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    timeout: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::new(err.to_string())
        }
    }
}

/// The renewal exchange failed.
#[derive(Debug, Clone, Error)]
pub enum RenewalError {
    #[error("renewal request failed: {0}")]
    Network(#[from] TransportError),

    #[error("renewal rejected with HTTP {status}")]
    Rejected {
        status: u16,
        code: Option<ErrorCode>,
        body: String,
    },
}

/// Errors returned by `ApiClient`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The transport could not complete the exchange.
    #[error("network failure: {0}")]
    Network(#[from] TransportError),

    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}{}", code_suffix(.code))]
    Domain {
        status: u16,
        category: StatusCategory,
        code: Option<ErrorCode>,
        body: String,
    },

    /// The session had expired and renewing it failed.
    #[error(transparent)]
    Renewal(#[from] RenewalError),

    /// The request payload could not be encoded as JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A 2xx body did not match the expected type.
    #[error("deserialization of HTTP {status} body failed: {source}")]
    Deserialization {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Classify a non-2xx response.
    pub fn from_response(status: u16, body: String) -> Self {
        ApiError::Domain {
            status,
            category: StatusCategory::from_status(status),
            code: ErrorCode::from_body(&body),
            body,
        }
    }

    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            ApiError::Domain { code, .. } => code.as_ref(),
            ApiError::Renewal(RenewalError::Rejected { code, .. }) => code.as_ref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Domain { status, .. } | ApiError::Deserialization { status, .. } => {
                Some(*status)
            }
            ApiError::Renewal(RenewalError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self.code(), Some(ErrorCode::SessionExpired))
    }
}

fn code_suffix(code: &Option<ErrorCode>) -> String {
    code.as_ref()
        .map(|c| format!(" (code {c})"))
        .unwrap_or_default()
}

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL {0:?} must use http or https")]
    UnsupportedScheme(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expired_code_is_recognized() {
        assert_eq!(
            ErrorCode::from_body(r#"{"code":"401003","message":"expired"}"#),
            Some(ErrorCode::SessionExpired)
        );
    }

    #[test]
    fn numeric_code_is_accepted() {
        assert_eq!(
            ErrorCode::from_body(r#"{"code":401003}"#),
            Some(ErrorCode::SessionExpired)
        );
        assert_eq!(
            ErrorCode::from_body(r#"{"code":404001}"#),
            Some(ErrorCode::Other("404001".to_string()))
        );
    }

    #[test]
    fn missing_or_garbled_code_yields_none() {
        assert_eq!(ErrorCode::from_body(""), None);
        assert_eq!(ErrorCode::from_body("<html>502</html>"), None);
        assert_eq!(ErrorCode::from_body(r#"{"message":"boom"}"#), None);
        assert_eq!(ErrorCode::from_body(r#"{"code":null}"#), None);
        assert_eq!(ErrorCode::from_body(r#"{"code":""}"#), None);
        assert_eq!(ErrorCode::from_body(r#""401003""#), None);
        assert_eq!(ErrorCode::from_body(r#"["401003"]"#), None);
        assert_eq!(ErrorCode::from_body("[401003]"), None);
    }

    #[test]
    fn from_response_classifies_status_and_code() {
        let err = ApiError::from_response(404, r#"{"code":"999999"}"#.to_string());
        match err {
            ApiError::Domain {
                status,
                category,
                code,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(category, StatusCategory::ClientError);
                assert_eq!(code, Some(ErrorCode::Other("999999".to_string())));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn display_includes_code_when_present() {
        let err = ApiError::from_response(403, r#"{"code":"401003"}"#.to_string());
        assert_eq!(err.to_string(), "HTTP 403 (code 401003)");
        let err = ApiError::from_response(500, String::new());
        assert_eq!(err.to_string(), "HTTP 500");
    }

    #[test]
    fn status_categories() {
        assert_eq!(StatusCategory::from_status(503), StatusCategory::ServerError);
        assert_eq!(StatusCategory::from_status(301), StatusCategory::Redirection);
        assert_eq!(StatusCategory::from_status(42), StatusCategory::Unknown);
    }
}
