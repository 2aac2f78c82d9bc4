use std::time::Duration;

use thiserror::Error;

use lina_shared::ErrorBody;

/// Everything a client call can fail with, classified for retry decisions
/// and for what to show the user.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request rejected {status} ({code}): {message}")]
    Client {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unauthorized ({code}): {message}")]
    Unauthorized { code: String, message: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Map a non-success HTTP status and its error body to a variant.
    pub fn from_status(status: u16, body: ErrorBody, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => ClientError::Unauthorized {
                code: body.code,
                message: body.message,
            },
            429 => ClientError::RateLimited { retry_after },
            500..=599 => ClientError::Server {
                status,
                code: body.code,
                message: body.message,
            },
            _ => ClientError::Client {
                status,
                code: body.code,
                message: body.message,
            },
        }
    }

    /// Network, timeout, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_)
                | ClientError::Timeout(_)
                | ClientError::Server { .. }
                | ClientError::RateLimited { .. }
        )
    }

    /// The server understood the request and refused it; resending the same
    /// payload cannot succeed.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Client { .. } | ClientError::Validation(_))
    }

    /// True when the failure means the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Timeout(_) => true,
            ClientError::RetriesExhausted { last, .. } => last.is_connectivity(),
            _ => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Server { code, .. }
            | ClientError::Client { code, .. }
            | ClientError::Unauthorized { code, .. } => Some(code),
            ClientError::RetriesExhausted { last, .. } => last.code(),
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    pub fn friendly_message(&self) -> String {
        match self {
            ClientError::Network(_) => {
                "Can't reach HeyLina right now. Check your connection and try again.".into()
            }
            ClientError::Timeout(_) => "That took too long. Please try again.".into(),
            ClientError::Server { code, .. } if code == "COMPLETION_FAILED" => {
                "Lina couldn't reply right now. Please try again in a moment.".into()
            }
            ClientError::Server { .. } => {
                "Something went wrong on our side. Please try again in a moment.".into()
            }
            ClientError::RateLimited { .. } => {
                "You're sending messages a little fast. Please wait a moment.".into()
            }
            ClientError::Unauthorized { code, .. } => match code.as_str() {
                "INVALID_CREDENTIALS" => "Email or password is incorrect".into(),
                "SESSION_EXPIRED" | "INVALID_REFRESH_TOKEN" => {
                    "Your session has expired. Please sign in again.".into()
                }
                _ => "Please sign in to continue.".into(),
            },
            ClientError::Client { code, message, .. } => match code.as_str() {
                "EMAIL_TAKEN" => "An account with this email already exists".into(),
                "INVALID_EMAIL" => "Please enter a valid email address".into(),
                "WEAK_PASSWORD" => "Password must be at least 8 characters".into(),
                "EMPTY_MESSAGE" => "Message cannot be empty".into(),
                _ => message.clone(),
            },
            ClientError::Validation(message) => message.clone(),
            ClientError::RetriesExhausted { last, .. } => last.friendly_message(),
            ClientError::NotSignedIn => "Please sign in first.".into(),
            ClientError::Storage(_) => "Couldn't save data on this device.".into(),
            ClientError::Decode(_) => "Received an unexpected response from HeyLina.".into(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str) -> ErrorBody {
        ErrorBody {
            code: code.to_string(),
            message: "details".to_string(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ClientError::from_status(401, body("X"), None),
            ClientError::Unauthorized { .. }
        ));
        assert!(matches!(
            ClientError::from_status(429, body("X"), Some(Duration::from_secs(2))),
            ClientError::RateLimited { retry_after: Some(_) }
        ));
        assert!(matches!(
            ClientError::from_status(503, body("X"), None),
            ClientError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ClientError::from_status(404, body("X"), None),
            ClientError::Client { status: 404, .. }
        ));
    }

    #[test]
    fn test_retryable_split() {
        assert!(ClientError::Network("reset".into()).is_retryable());
        assert!(ClientError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ClientError::from_status(500, body("X"), None).is_retryable());
        assert!(ClientError::from_status(429, body("X"), None).is_retryable());

        assert!(!ClientError::from_status(400, body("X"), None).is_retryable());
        assert!(!ClientError::from_status(401, body("X"), None).is_retryable());
        assert!(!ClientError::Validation("bad".into()).is_retryable());
        assert!(!ClientError::NotSignedIn.is_retryable());
    }

    #[test]
    fn test_rejection_is_only_client_side() {
        assert!(ClientError::from_status(400, body("X"), None).is_rejection());
        assert!(ClientError::Validation("bad".into()).is_rejection());
        assert!(!ClientError::from_status(401, body("X"), None).is_rejection());
        assert!(!ClientError::from_status(500, body("X"), None).is_rejection());
        assert!(!ClientError::NotSignedIn.is_rejection());
    }

    #[test]
    fn test_connectivity_sees_through_exhaustion() {
        let err = ClientError::RetriesExhausted {
            attempts: 4,
            last: Box::new(ClientError::Network("refused".into())),
        };
        assert!(err.is_connectivity());
        assert!(!err.is_retryable());

        let err = ClientError::RetriesExhausted {
            attempts: 4,
            last: Box::new(ClientError::from_status(502, body("COMPLETION_FAILED"), None)),
        };
        assert!(!err.is_connectivity());
        assert_eq!(err.code(), Some("COMPLETION_FAILED"));
    }

    #[test]
    fn test_friendly_messages() {
        let err = ClientError::from_status(401, body("INVALID_CREDENTIALS"), None);
        assert_eq!(err.friendly_message(), "Email or password is incorrect");

        let err = ClientError::from_status(409, body("EMAIL_TAKEN"), None);
        assert_eq!(err.friendly_message(), "An account with this email already exists");

        let err = ClientError::RetriesExhausted {
            attempts: 2,
            last: Box::new(ClientError::Timeout(Duration::from_secs(5))),
        };
        assert_eq!(err.friendly_message(), "That took too long. Please try again.");
    }
}
