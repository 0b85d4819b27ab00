use crate::capability::CapabilityLevel;
use crate::store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Everything a handler can fail with. Converted to a [`Failure`] payload
/// before it crosses the call boundary; raw errors never do.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unexpected error: {0}")]
    Unexpected(String),
    #[error("consent request failed: {0}")]
    Consent(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("operation requires the {required:?} capability level, current level is {current:?}")]
    UnsupportedOnPlatformVersion {
        required: CapabilityLevel,
        current: CapabilityLevel,
    },
    #[error("no playlist with id {id}")]
    PlaylistNotFound { id: i64 },
}

impl BridgeError {
    /// Stable code for programmatic handling on the far side of the bridge.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Unexpected(_) => "UNEXPECTED_ERROR",
            BridgeError::Consent(_) => "PLATFORM_CONSENT_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
            BridgeError::UnsupportedOnPlatformVersion { .. } => "UNSUPPORTED_ON_PLATFORM_VERSION",
            BridgeError::PlaylistNotFound { .. } => "PLAYLIST_NOT_FOUND",
        }
    }
}

impl From<StoreError> for BridgeError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Io(message) => BridgeError::Io(message),
            StoreError::Access(message) => BridgeError::Unexpected(message),
            // Cancellation is handled where the token lives; a token that
            // leaks through anyway is a bug in the store implementation.
            StoreError::Canceled => BridgeError::Unexpected("store canceled the operation".into()),
        }
    }
}

/// The failure half of a call outcome: stable code plus human-readable
/// message and diagnostic detail. Never a bare boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub code: &'static str,
    pub message: String,
    pub details: String,
}

impl From<BridgeError> for Failure {
    fn from(error: BridgeError) -> Self {
        Failure {
            code: error.code(),
            message: error.to_string(),
            details: format!("{error:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_code_and_message() {
        let failure = Failure::from(BridgeError::PlaylistNotFound { id: 9 });
        assert_eq!(failure.code, "PLAYLIST_NOT_FOUND");
        assert_eq!(failure.message, "no playlist with id 9");
        assert!(failure.details.contains("PlaylistNotFound"));
    }

    #[test]
    fn store_io_maps_to_io() {
        let error = BridgeError::from(StoreError::Io("read failed".into()));
        assert_eq!(error.code(), "IO_ERROR");
    }
}
