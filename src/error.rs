//! Error types for the dashboard poller

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Webhook endpoint is not configured: {0}")]
    EndpointNotConfigured(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A fetch is already in progress")]
    FetchInProgress,

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether a retry within the same cycle could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::HttpError(_) | Error::Timeout(_) | Error::IoError(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_decode() {
            Error::SerializationError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_endpoint_not_configured() {
        let err = Error::EndpointNotConfigured("YOUR_WEBHOOK_URL".to_string());
        assert!(err.to_string().contains("not configured"));
        assert!(err.to_string().contains("YOUR_WEBHOOK_URL"));
    }

    #[test]
    fn test_error_display_fetch_in_progress() {
        let err = Error::FetchInProgress;
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_error_display_store_error() {
        let err = Error::StoreError("disk full".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Store error"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::HttpError("502".into()).is_transient());
        assert!(Error::Timeout("30s".into()).is_transient());
        assert!(!Error::EndpointNotConfigured("".into()).is_transient());
        assert!(!Error::SerializationError("eof".into()).is_transient());
        assert!(!Error::FetchInProgress.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_error_all_variants_debug() {
        let variants: Vec<Error> = vec![
            Error::EndpointNotConfigured("url".to_string()),
            Error::HttpError("http".to_string()),
            Error::Timeout("timeout".to_string()),
            Error::SerializationError("serial".to_string()),
            Error::StoreError("store".to_string()),
            Error::InvalidArgument("arg".to_string()),
            Error::FetchInProgress,
            Error::Cancelled,
        ];

        for err in variants {
            let debug_str = format!("{:?}", err);
            assert!(!debug_str.is_empty());
        }
    }

    #[test]
    fn test_io_errors_are_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(err.is_transient());
    }
}
