//! Core data types shared by every pipeline stage.
//!
//! - [`RawFrame`] is what a source yields, [`Frame`] is a raw frame stamped with its
//!   session sequence index.
//! - [`Batch`] is a sealed, immutable group of frames handed to the uploader.
//! - [`StreamState`], [`StreamStatus`] and [`SessionSummary`] describe the lifecycle.
//! - [`UploadResult`] reports the outcome of one batch delivery.
//!
//! ```rust
//! use framecast::types::{Batch, RawFrame};
//!
//! let frames = (0..3)
//!     .map(|i| RawFrame::new(vec![0xFF, 0xD8, 0xFF, 0xD9], i * 33).sequenced(i))
//!     .collect();
//! let batch = Batch::seal(frames).expect("non-empty");
//! assert_eq!(batch.first_sequence(), 0);
//! assert_eq!(batch.last_sequence(), 2);
//! ```

mod frame;
mod status;
mod upload;

pub use frame::{Batch, Frame, RawFrame};
pub use status::{SessionCounters, SessionEnd, SessionSummary, StreamState, StreamStatus};
pub use upload::{BackendResponse, FrameLabel, UploadFailureKind, UploadResult};
