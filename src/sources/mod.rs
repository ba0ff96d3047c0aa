//! Bundled frame sources.
//!
//! - [`CameraSource`] paces a [`CameraDevice`] with a [`FrameClock`]
//! - [`VideoSampler`] samples a stored video through a [`FrameExtractor`]
//! - [`FeedSource`] consumes frames pushed by the host through a [`FrameFeeder`]
//!
//! The ffmpeg-backed [`FfmpegCamera`] and [`FfmpegExtractor`] are the default
//! device and extractor used by [`from_config`].

mod camera;
mod feed;
mod ffmpeg;
mod sampler;

pub use camera::{CameraDevice, CameraSource, CaptureSettings, FrameClock};
pub use feed::{FeedOutcome, FeedSource, FrameFeeder};
pub use ffmpeg::{
    FfmpegCamera, FfmpegExtractor, JpegStreamReader, parse_probe_duration, resolve_device,
};
pub use sampler::{FrameExtractor, VideoSampler, sample_offsets};

use crate::config::{SourceConfig, StreamConfig};
use crate::source::FrameSource;
use crate::{Result, StreamError};

/// Build the ffmpeg-backed source described by `config.source`.
///
/// Host feeds cannot be built here since the host must keep the feeder: create
/// them with [`FeedSource::channel`] and pass them to
/// [`StreamController::start_with`](crate::StreamController::start_with).
pub fn from_config(config: &StreamConfig) -> Result<Box<dyn FrameSource>> {
    match &config.source {
        SourceConfig::Camera { device, facing } => {
            let settings = CaptureSettings {
                width: config.frame_width,
                height: config.frame_height,
                facing: *facing,
                fps: config.target_fps,
            };
            Ok(Box::new(CameraSource::new(FfmpegCamera::new(device), settings)))
        }
        SourceConfig::File { path } => {
            let extractor = FfmpegExtractor::new(path, config.frame_width, config.frame_height);
            Ok(Box::new(VideoSampler::new(extractor, config.sample_interval_ms)))
        }
        SourceConfig::Feed => Err(StreamError::config(
            "source",
            "feed sources are created with FeedSource::channel and passed to start_with",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraFacing;

    #[test]
    fn builds_sources_from_config() {
        let mut config = StreamConfig::new("http://localhost:8080/upload");

        config.source = SourceConfig::Camera { device: "0".into(), facing: CameraFacing::Front };
        let source = from_config(&config).expect("camera");
        assert!(source.describe().contains("/dev/video0"));

        config.source = SourceConfig::File { path: "/videos/clip.mp4".into() };
        let source = from_config(&config).expect("file");
        assert!(source.describe().contains("clip.mp4"));

        config.source = SourceConfig::Feed;
        assert!(from_config(&config).is_err());
    }
}
