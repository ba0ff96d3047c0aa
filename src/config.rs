//! Stream configuration.
//!
//! [`StreamConfig`] is plain serde data with defaults for everything except the
//! endpoint. It can be built in code or loaded from YAML:
//!
//! ```rust
//! use framecast::{SourceConfig, StreamConfig};
//!
//! let config = StreamConfig::from_yaml_str(
//!     r#"
//! endpoint_url: http://localhost:8080/image_posting
//! frame_batch_size: 4
//! source:
//!   kind: file
//!   path: /videos/squats.mp4
//! "#,
//! )?;
//! assert_eq!(config.frame_batch_size, 4);
//! assert!(matches!(config.source, SourceConfig::File { .. }));
//! # Ok::<(), framecast::StreamError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, StreamError};

/// Which way the camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Live camera device, e.g. `/dev/video0` or a bare index `0`
    Camera {
        #[serde(default = "default_device")]
        device: String,
        #[serde(default)]
        facing: CameraFacing,
    },
    /// Stored video sampled every `sample_interval_ms`
    File { path: PathBuf },
    /// Frames pushed by the host through a `FrameFeeder`
    Feed,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Camera { device: default_device(), facing: CameraFacing::default() }
    }
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

/// Request body layout for batch uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// `multipart/form-data`, one `images` file part per frame
    #[default]
    Multipart,
    /// JSON document with base64 frame payloads
    Json,
}

/// Configuration of one streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub source: SourceConfig,
    pub frame_batch_size: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Sampling interval for file sources
    pub sample_interval_ms: u64,
    /// Capture cadence for camera sources
    pub target_fps: u32,
    pub endpoint_url: String,
    /// Reachability probe target, defaults to `endpoint_url`
    pub health_url: Option<String>,
    pub payload_encoding: PayloadEncoding,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub upload_concurrency: usize,
    pub partial_flush_on_stop: bool,
    /// How long `stop()` waits for in-flight uploads; 0 abandons them immediately
    pub upload_grace_ms: u64,
    /// Escalate to a device error after this many consecutive capture failures
    pub max_consecutive_capture_errors: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            frame_batch_size: 1,
            frame_width: 320,
            frame_height: 240,
            sample_interval_ms: 1_000,
            target_fps: 30,
            endpoint_url: String::new(),
            health_url: None,
            payload_encoding: PayloadEncoding::default(),
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            request_timeout_ms: 10_000,
            upload_concurrency: 2,
            partial_flush_on_stop: true,
            upload_grace_ms: 5_000,
            max_consecutive_capture_errors: None,
        }
    }
}

impl StreamConfig {
    /// Default configuration posting to `endpoint_url`
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self { endpoint_url: endpoint_url.into(), ..Self::default() }
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamError::config("<document>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| StreamError::io_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check every field constraint.
    pub fn validate(&self) -> Result<()> {
        if self.frame_batch_size == 0 {
            return Err(StreamError::config("frame_batch_size", "must be at least 1"));
        }
        if self.upload_concurrency == 0 {
            return Err(StreamError::config("upload_concurrency", "must be at least 1"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(StreamError::config("frame_width/frame_height", "must be non-zero"));
        }
        if self.sample_interval_ms == 0 {
            return Err(StreamError::config("sample_interval_ms", "must be at least 1"));
        }
        if self.target_fps == 0 {
            return Err(StreamError::config("target_fps", "must be at least 1"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(StreamError::config(
                "retry_base_delay_ms",
                "must not exceed retry_max_delay_ms",
            ));
        }
        validate_url("endpoint_url", &self.endpoint_url)?;
        if let Some(health) = &self.health_url {
            validate_url("health_url", health)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_grace(&self) -> Duration {
        Duration::from_millis(self.upload_grace_ms)
    }

    /// Retry policy derived from the retry fields
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// URL hit by the health probe
    pub fn probe_url(&self) -> &str {
        self.health_url.as_deref().unwrap_or(&self.endpoint_url)
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).map_err(|e| StreamError::config(field, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(StreamError::config(field, format!("unsupported scheme '{other}'"))),
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Total attempts allowed per batch
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << shift).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        StreamConfig::default().retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> StreamConfig {
        StreamConfig::new("http://localhost:8080/image_posting")
    }

    #[test]
    fn defaults_validate_once_endpoint_is_set() {
        assert!(StreamConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = StreamConfig { frame_batch_size: 0, ..valid() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("frame_batch_size"));

        let config = StreamConfig { upload_concurrency: 0, ..valid() };
        assert!(config.validate().is_err());

        let config = StreamConfig { sample_interval_ms: 0, ..valid() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_must_be_http() {
        let config = StreamConfig::new("ftp://example.com/upload");
        assert!(config.validate().is_err());

        let config = StreamConfig::new("not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn yaml_fills_defaults() {
        let config = StreamConfig::from_yaml_str(
            "endpoint_url: https://api.example.com/frames\npartial_flush_on_stop: false\n",
        )
        .expect("parse");
        assert!(!config.partial_flush_on_stop);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.source, SourceConfig::default());
    }

    #[test]
    fn yaml_camera_source_with_facing() {
        let config = StreamConfig::from_yaml_str(
            r#"
endpoint_url: http://127.0.0.1:8080/live-stream
source:
  kind: camera
  device: "1"
  facing: front
payload_encoding: json
"#,
        )
        .expect("parse");
        assert_eq!(
            config.source,
            SourceConfig::Camera { device: "1".to_string(), facing: CameraFacing::Front }
        );
        assert_eq!(config.payload_encoding, PayloadEncoding::Json);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "endpoint_url: http://localhost:9000/upload").expect("write");
        writeln!(file, "frame_batch_size: 8").expect("write");

        let config = StreamConfig::load(file.path()).expect("load");
        assert_eq!(config.frame_batch_size, 8);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = StreamConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, StreamError::Io { .. }));
    }

    #[test]
    fn probe_url_falls_back_to_endpoint() {
        let mut config = valid();
        assert_eq!(config.probe_url(), "http://localhost:8080/image_posting");
        config.health_url = Some("http://localhost:8080/health".to_string());
        assert_eq!(config.probe_url(), "http://localhost:8080/health");
    }
}
