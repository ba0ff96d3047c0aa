//! Async frame capture and batched streaming pipeline.
//!
//! Framecast grabs image frames from a live camera, a stored video or a host
//! callback, groups them into fixed-size batches and posts each batch to an HTTP
//! backend, with retry and bounded upload concurrency.
//!
//! # Features
//!
//! - **Sources**: ffmpeg-backed camera and video sampling, or frames pushed by the host
//! - **Batching**: strict sequence order, no gaps or duplicates within a session
//! - **Backpressure**: a fixed number of upload slots; capture skips frames instead of
//!   queueing without bound
//! - **Lifecycle**: one controller, one session at a time, observable through a watch
//!   channel
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framecast::{SourceConfig, StreamConfig, StreamController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = StreamConfig::new("http://localhost:8080/image_posting");
//!     config.source = SourceConfig::File { path: "/videos/squat.mp4".into() };
//!     config.sample_interval_ms = 10_000;
//!     config.frame_batch_size = 3;
//!
//!     let controller = StreamController::new();
//!     controller.probe(&config).await?;
//!     controller.start(config).await?;
//!
//!     let mut status = controller.subscribe();
//!     while status.changed().await.is_ok() {
//!         let current = status.borrow().clone();
//!         println!("{}: {} sent", current.state, current.batches_sent());
//!         if current.state.is_settled() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Host-fed frames
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use framecast::{FeedSource, HttpTransport, SourceConfig, StreamConfig, StreamController};
//!
//! # async fn run(jpeg: Vec<u8>) -> framecast::Result<()> {
//! let mut config = StreamConfig::new("http://localhost:8080/image_posting");
//! config.source = SourceConfig::Feed;
//!
//! let (source, feeder) = FeedSource::channel();
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let controller = StreamController::new();
//! controller.start_with(config, source, transport).await?;
//!
//! // From the host's camera callback
//! feeder.feed(jpeg);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod controller;
mod error;
pub mod source;
pub mod sources;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod upload;

pub use buffer::{BufferState, FrameBuffer};
pub use config::{CameraFacing, PayloadEncoding, RetryPolicy, SourceConfig, StreamConfig};
pub use controller::StreamController;
pub use error::*;
pub use source::FrameSource;
pub use sources::{FeedOutcome, FeedSource, FrameFeeder};
pub use types::*;
pub use upload::{HttpTransport, Transport, Uploader};
