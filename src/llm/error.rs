//! Errors returned by the response generator boundary.

use reqwest::StatusCode;
use thiserror::Error;

/// Why a remote generation call produced no reply.
///
/// Every failure of the remote model call is converted into one of these
/// variants; nothing from the provider is propagated as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The request never got an HTTP response (connect, DNS, TLS, body read).
    #[error("network failure: {0}")]
    Network(String),

    /// The provider rejected the credentials.
    #[error("authentication failed (HTTP {status}): {message}")]
    Auth {
        /// HTTP status code (401 or 403).
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The account ran out of quota or hit a rate limit.
    #[error("quota exceeded: {message}")]
    Quota {
        /// Error message from the provider.
        message: String,
    },

    /// Any other non-success response.
    #[error("provider error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The provider answered but the body could not be understood.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl GenerationError {
    /// Short machine-readable name of the failure class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth { .. } => "auth",
            Self::Quota { .. } => "quota",
            Self::Api { .. } => "api",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Classify a non-success HTTP response.
    ///
    /// The message is taken from an OpenAI-style `{"error":{"message":..}}`
    /// body when present, otherwise from the raw body text.
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = provider_message(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("no response body")
                    .to_string()
            } else {
                trimmed.to_string()
            }
        });

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth {
                status: status.as_u16(),
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => Self::Quota { message },
            _ => Self::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

fn provider_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .or_else(|| error.as_str())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_auth() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        let err = GenerationError::from_status(StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            err,
            GenerationError::Auth {
                status: 401,
                message: "Incorrect API key provided".to_string()
            }
        );
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn test_too_many_requests_is_quota() {
        let body = r#"{"error":{"message":"You exceeded your current quota"}}"#;
        let err = GenerationError::from_status(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.kind(), "quota");
        assert_eq!(err.to_string(), "quota exceeded: You exceeded your current quota");
    }

    #[test]
    fn test_server_error_uses_raw_body() {
        let err = GenerationError::from_status(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(
            err,
            GenerationError::Api {
                status: 502,
                message: "upstream down".to_string()
            }
        );
    }

    #[test]
    fn test_empty_body_falls_back_to_reason() {
        let err = GenerationError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(
            err.to_string(),
            "provider error (HTTP 500): Internal Server Error"
        );
    }

    #[test]
    fn test_string_error_field() {
        let err = GenerationError::from_status(StatusCode::BAD_REQUEST, r#"{"error":"bad model"}"#);
        assert_eq!(err.to_string(), "provider error (HTTP 400): bad model");
    }

    #[test]
    fn test_json_error_is_malformed() {
        let err: GenerationError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "malformed_response");
    }
}
