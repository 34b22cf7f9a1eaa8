use reqwest::StatusCode;

/// Errors surfaced by the session layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Login exchange refused the supplied credentials.
    #[error("Credentials rejected: {0}")]
    CredentialRejected(String),

    /// A refresh was requested while no refresh credential is stored.
    #[error("No refresh credential available")]
    NoRefreshCredential,

    /// Refresh exchange failed; the session has been torn down.
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    /// Authorization failure that survived the refresh-and-retry attempt.
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Non-authorization error response from the API.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Durable storage read/write failure.
    #[error("Session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    /// Operation not allowed from the current lifecycle state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

/// Error response from a business API call, with a human-readable message
/// extracted from the structured body.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
#[non_exhaustive]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub body: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status,
            message: crate::http::format_error_message(status, &body),
            body,
        }
    }
}

/// Outcome shared by every waiter of one refresh exchange.
///
/// Cloneable so a single in-flight result can be handed to all callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("No refresh credential available")]
    NoCredential,
    #[error("Refresh rejected: {0}")]
    Rejected(String),
}

impl From<RefreshError> for Error {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::NoCredential => Self::NoRefreshCredential,
            RefreshError::Rejected(msg) => Self::RefreshFailed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_error_maps_to_session_error() {
        assert!(matches!(
            Error::from(RefreshError::NoCredential),
            Error::NoRefreshCredential
        ));
        assert!(matches!(
            Error::from(RefreshError::Rejected("401".into())),
            Error::RefreshFailed(msg) if msg == "401"
        ));
    }

    #[test]
    fn api_error_displays_formatted_message() {
        let err = ApiError::new(StatusCode::BAD_REQUEST, r#"{"detail":"Nope"}"#);
        assert_eq!(err.to_string(), "Nope");
        assert_eq!(err.body, r#"{"detail":"Nope"}"#);
    }
}
