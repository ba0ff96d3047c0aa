//! Error types for the capture and streaming pipeline.
//!
//! Every fallible operation in the crate returns [`StreamError`]. Errors carry
//! structured context and can be classified by the layer that must react to them:
//!
//! - **Source errors** (`Permission`, `Device`): fatal to the session that hit them.
//! - **Frame errors** (`Capture`): transient, the capture loop logs and continues.
//! - **Batch errors** (`Network`, `Timeout`, `EndpointRejection`, `Encoding`): contained
//!   to one batch and reported through session counters.
//! - **Caller errors** (`Config`, `InvalidState`, `Io`): returned straight to the caller.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use framecast::StreamError;
//!
//! let error = StreamError::network("connection reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! ## Helper Constructors
//!
//! ```rust
//! use framecast::StreamError;
//!
//! let denied = StreamError::permission_denied("/dev/video0");
//! let gone = StreamError::device_unavailable("camera unplugged");
//! let rejected = StreamError::endpoint_rejection(413, "payload too large");
//! assert!(denied.is_fatal_to_session());
//! assert!(gone.is_fatal_to_session());
//! assert!(!rejected.is_retryable());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Access to {resource} was denied")]
    Permission { resource: String },

    #[error("Frame source unavailable: {reason}")]
    Device {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Frame capture failed: {reason}")]
    Capture { reason: String },

    #[error("Network error: {reason}")]
    Network {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Endpoint rejected batch with status {status}: {body}")]
    EndpointRejection { status: u16, body: String },

    #[error("Failed to encode batch payload: {details}")]
    Encoding { details: String },

    #[error("Invalid configuration for '{field}': {reason}")]
    Config { field: String, reason: String },

    #[error("Cannot {operation} while stream is {state}")]
    InvalidState { operation: String, state: String },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Network { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::Capture { .. } => true,
            StreamError::EndpointRejection { .. } => false,
            StreamError::Encoding { .. } => false,
            StreamError::Permission { .. } => false,
            StreamError::Device { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::InvalidState { .. } => false,
            StreamError::Io { .. } => false,
        }
    }

    /// Returns whether this error must terminate the session that produced it.
    ///
    /// Only source level failures qualify. Frame and batch errors are contained.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, StreamError::Permission { .. } | StreamError::Device { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Permission { .. } => vec![
                "Grant camera or file access to the current user",
                "Check membership of the 'video' group for V4L2 devices",
                "Re-run the permission prompt in the host application",
            ],
            StreamError::Device { .. } => vec![
                "Check the camera is connected and not in use by another process",
                "Verify the video file still exists",
                "Ensure ffmpeg and ffprobe are installed and on PATH",
            ],
            StreamError::Capture { .. } => vec![
                "Transient capture failures are skipped automatically",
                "Lower the capture resolution or frame rate if failures persist",
            ],
            StreamError::Network { .. } => vec![
                "Check network connectivity to the backend",
                "Verify the endpoint URL and port",
                "Probe the endpoint before starting a session",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase request_timeout_ms",
                "Reduce frame_batch_size to shrink request bodies",
                "Check backend load",
            ],
            StreamError::EndpointRejection { .. } => vec![
                "Check the payload encoding expected by the backend",
                "Verify the endpoint path",
                "Inspect the response body for the rejection reason",
            ],
            StreamError::Encoding { .. } => vec![
                "Check frame payloads are valid encoded images",
                "Switch payload_encoding between multipart and json",
            ],
            StreamError::Config { .. } => vec![
                "Fix the named configuration field",
                "Compare against StreamConfig::default()",
            ],
            StreamError::InvalidState { .. } => vec![
                "Call stop() before reconfiguring the stream",
                "Check status() before issuing lifecycle calls",
            ],
            StreamError::Io { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for permission errors.
    pub fn permission_denied(resource: impl Into<String>) -> Self {
        StreamError::Permission { resource: resource.into() }
    }

    /// Helper constructor for device errors.
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        StreamError::Device { reason: reason.into(), source: None }
    }

    /// Helper constructor for device errors with source.
    pub fn device_unavailable_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Device { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for transient capture errors.
    pub fn capture_failed(reason: impl Into<String>) -> Self {
        StreamError::Capture { reason: reason.into() }
    }

    /// Helper constructor for network errors.
    pub fn network(reason: impl Into<String>) -> Self {
        StreamError::Network { reason: reason.into(), source: None }
    }

    /// Helper constructor for network errors with source.
    pub fn network_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Network { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for endpoint rejections.
    pub fn endpoint_rejection(status: u16, body: impl Into<String>) -> Self {
        StreamError::EndpointRejection { status, body: body.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::Config { field: field.into(), reason: reason.into() }
    }

    /// Helper constructor for lifecycle misuse.
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        StreamError::InvalidState { operation: operation.into(), state: state.to_string() }
    }

    /// Helper constructor for I/O errors with path context.
    pub fn io_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::Io { path, source }
    }

    /// Map an I/O error raised while opening a source into the source taxonomy.
    ///
    /// Permission denied becomes [`StreamError::Permission`], everything else
    /// becomes [`StreamError::Device`].
    pub fn from_source_io(resource: impl Into<String>, err: std::io::Error) -> Self {
        let resource = resource.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => StreamError::Permission { resource },
            _ => StreamError::Device {
                reason: format!("{resource}: {err}"),
                source: Some(Box::new(err)),
            },
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return StreamError::Encoding { details: err.to_string() };
        }
        let reason = if err.is_connect() {
            "connection failed".to_string()
        } else if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        StreamError::Network { reason, source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn error_messages_carry_their_context(
            reason in ".*",
            resource in "[a-z/0-9]+",
            status in 400u16..600u16,
        ) {
            let device = StreamError::device_unavailable(reason.clone());
            let capture = StreamError::capture_failed(reason.clone());
            let permission = StreamError::permission_denied(resource.clone());
            let rejection = StreamError::endpoint_rejection(status, reason.clone());

            prop_assert!(device.to_string().contains(&reason));
            prop_assert!(capture.to_string().contains(&reason));
            prop_assert!(permission.to_string().contains(&resource));
            prop_assert!(rejection.to_string().contains(&status.to_string()));
        }

        #[test]
        fn fatal_errors_are_never_retryable(reason in ".*") {
            let errors = [
                StreamError::device_unavailable(reason.clone()),
                StreamError::permission_denied(reason.clone()),
                StreamError::capture_failed(reason.clone()),
                StreamError::network(reason.clone()),
                StreamError::endpoint_rejection(404, reason.clone()),
            ];
            for err in &errors {
                prop_assert!(!(err.is_fatal_to_session() && err.is_retryable()));
            }
        }
    }

    #[test]
    fn source_io_errors_map_to_taxonomy() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            StreamError::from_source_io("/dev/video0", denied),
            StreamError::Permission { .. }
        ));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StreamError::from_source_io("/dev/video9", missing);
        assert!(matches!(err, StreamError::Device { .. }));
        assert!(err.to_string().contains("/dev/video9"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();
    }

    #[test]
    fn recovery_suggestions_are_actionable() {
        let errors = [
            StreamError::permission_denied("camera"),
            StreamError::device_unavailable("unplugged"),
            StreamError::Timeout { duration: Duration::from_secs(1) },
            StreamError::config("frame_batch_size", "must be at least 1"),
        ];
        for err in &errors {
            let suggestions = err.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn io_conversion_keeps_source() {
        let err: StreamError = std::io::Error::new(std::io::ErrorKind::NotFound, "clip.mp4").into();
        match err {
            StreamError::Io { source, .. } => assert_eq!(source.to_string(), "clip.mp4"),
            other => panic!("Expected Io error, got {other:?}"),
        }
    }
}
