//! reqwest-backed transport

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{Transport, classify_status};
use crate::config::{PayloadEncoding, StreamConfig};
use crate::types::{BackendResponse, Batch, Frame};
use crate::{Result, StreamError};

/// Multipart field carrying the frame images
pub const IMAGES_FIELD: &str = "images";

/// JSON request body for [`PayloadEncoding::Json`].
#[derive(Debug, Serialize)]
pub struct JsonBatch {
    pub session_id: Uuid,
    pub frames: Vec<JsonFrame>,
}

/// One frame of a [`JsonBatch`], payload in standard base64.
#[derive(Debug, Serialize)]
pub struct JsonFrame {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub data: String,
}

impl JsonBatch {
    pub fn new(session_id: Uuid, batch: &Batch) -> Self {
        let frames = batch
            .frames()
            .iter()
            .map(|frame| JsonFrame {
                sequence: frame.sequence,
                timestamp_ms: frame.timestamp_ms,
                data: STANDARD.encode(&frame.data),
            })
            .collect();
        Self { session_id, frames }
    }
}

/// File name of a frame's multipart part
pub fn frame_file_name(frame: &Frame) -> String {
    format!("frame_{:08}.jpg", frame.sequence)
}

fn joined<F: Fn(&Frame) -> u64>(batch: &Batch, field: F) -> String {
    batch.frames().iter().map(|f| field(f).to_string()).collect::<Vec<_>>().join(",")
}

/// Posts batches to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    probe_url: reqwest::Url,
    encoding: PayloadEncoding,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for the endpoint, encoding and timeout in `config`
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let endpoint = reqwest::Url::parse(&config.endpoint_url)
            .map_err(|e| StreamError::config("endpoint_url", e.to_string()))?;
        let probe_url = reqwest::Url::parse(config.probe_url())
            .map_err(|e| StreamError::config("health_url", e.to_string()))?;

        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                StreamError::network_with_source("failed to build HTTP client", Box::new(e))
            })?;

        Ok(Self { client, endpoint, probe_url, encoding: config.payload_encoding, timeout })
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }

    fn multipart_form(session_id: Uuid, batch: &Batch) -> Result<Form> {
        let mut form = Form::new()
            .text("session_id", session_id.to_string())
            .text("sequences", joined(batch, |f| f.sequence))
            .text("timestamps_ms", joined(batch, |f| f.timestamp_ms));

        for frame in batch.frames() {
            let part = Part::stream_with_length(
                reqwest::Body::from(frame.data.clone()),
                frame.data.len() as u64,
            )
            .file_name(frame_file_name(frame))
            .mime_str("image/jpeg")
            .map_err(|e| StreamError::Encoding { details: e.to_string() })?;
            form = form.part(IMAGES_FIELD, part);
        }
        Ok(form)
    }

    fn map_send_error(&self, err: reqwest::Error) -> StreamError {
        if err.is_timeout() {
            StreamError::Timeout { duration: self.timeout }
        } else {
            err.into()
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post_batch(&self, session_id: Uuid, batch: &Batch) -> Result<BackendResponse> {
        let request = self.client.post(self.endpoint.clone());
        let request = match self.encoding {
            PayloadEncoding::Multipart => {
                request.multipart(Self::multipart_form(session_id, batch)?)
            }
            PayloadEncoding::Json => request.json(&JsonBatch::new(session_id, batch)),
        };

        trace!(
            endpoint = %self.endpoint,
            frames = batch.len(),
            bytes = batch.payload_bytes(),
            "Posting batch"
        );

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        classify_status(status, body)
    }

    async fn probe(&self) -> Result<()> {
        let response = self
            .client
            .get(self.probe_url.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        debug!(url = %self.probe_url, status = status.as_u16(), "Endpoint probe");
        if status.is_server_error() {
            return Err(StreamError::network(format!("probe returned {}", status.as_u16())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::batch_of;

    #[test]
    fn json_body_keeps_order_and_encodes_base64() {
        let session = Uuid::nil();
        let body = JsonBatch::new(session, &batch_of(4, 2));
        let json = serde_json::to_value(&body).expect("serialize");

        assert_eq!(json["frames"][0]["sequence"], 4);
        assert_eq!(json["frames"][1]["sequence"], 5);
        let decoded = STANDARD
            .decode(json["frames"][0]["data"].as_str().expect("string"))
            .expect("base64");
        assert_eq!(decoded, batch_of(4, 2).frames()[0].data.to_vec());
    }

    #[test]
    fn part_names_are_zero_padded() {
        let batch = batch_of(12, 1);
        assert_eq!(frame_file_name(&batch.frames()[0]), "frame_00000012.jpg");
    }

    #[test]
    fn metadata_fields_are_comma_separated() {
        let batch = batch_of(0, 3);
        assert_eq!(joined(&batch, |f| f.sequence), "0,1,2");
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let config = StreamConfig::new("::not-a-url::");
        assert!(matches!(HttpTransport::new(&config), Err(StreamError::Config { .. })));
    }
}
