//! Upload outcome types

use serde::{Deserialize, Serialize};

use crate::StreamError;

/// Body and status returned by the backend for an accepted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: String,
}

/// Per-frame label reported by a classification backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLabel {
    /// Name of the uploaded part, e.g. `frame_00000012.jpg`
    pub name: String,
    pub label: String,
}

#[derive(Deserialize)]
struct LabelEnvelope {
    message: Vec<FrameLabel>,
}

impl BackendResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    /// Labels from a `{"message": [{"name", "label"}]}` body, if the backend sent one.
    pub fn labels(&self) -> Option<Vec<FrameLabel>> {
        serde_json::from_str::<LabelEnvelope>(&self.body).ok().map(|env| env.message)
    }
}

/// Category of a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailureKind {
    Network,
    Timeout,
    EndpointRejection { status: u16 },
    Encoding,
}

impl UploadFailureKind {
    /// Classify the error of one attempt
    pub fn classify(error: &StreamError) -> Self {
        match error {
            StreamError::Timeout { .. } => UploadFailureKind::Timeout,
            StreamError::EndpointRejection { status, .. } => {
                UploadFailureKind::EndpointRejection { status: *status }
            }
            StreamError::Encoding { .. } => UploadFailureKind::Encoding,
            _ => UploadFailureKind::Network,
        }
    }
}

/// Outcome of delivering one batch, after all retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Delivered { attempts: u32, response: BackendResponse },
    Failed { attempts: u32, kind: UploadFailureKind, retryable: bool, message: String },
}

impl UploadResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadResult::Delivered { .. })
    }

    /// Number of delivery attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            UploadResult::Delivered { attempts, .. } | UploadResult::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_from_classification_body() {
        let response = BackendResponse::new(
            200,
            r#"{"message": [{"name": "frame_00000000.jpg", "label": "squat"}]}"#,
        );
        let labels = response.labels().expect("labels");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label, "squat");
    }

    #[test]
    fn unrelated_bodies_have_no_labels() {
        assert!(BackendResponse::new(200, "ok").labels().is_none());
        assert!(BackendResponse::new(200, r#"{"event": "frame_received"}"#).labels().is_none());
    }

    #[test]
    fn failures_classify_by_error() {
        assert_eq!(
            UploadFailureKind::classify(&StreamError::endpoint_rejection(422, "bad")),
            UploadFailureKind::EndpointRejection { status: 422 }
        );
        assert_eq!(
            UploadFailureKind::classify(&StreamError::network("reset")),
            UploadFailureKind::Network
        );
    }
}
