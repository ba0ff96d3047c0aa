//! Frame and batch types for the capture pipeline

use bytes::Bytes;
use std::sync::Arc;

/// Unsequenced frame as produced by a [`FrameSource`](crate::source::FrameSource).
///
/// Sequence indices are assigned by the capture loop, so a source never has to
/// know about session boundaries or skipped captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Encoded image payload (JPEG for the bundled sources)
    pub data: Bytes,

    /// Milliseconds since stream start, or the sample offset for file sources
    pub timestamp_ms: u64,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(data: impl Into<Bytes>, timestamp_ms: u64) -> Self {
        Self { data: data.into(), timestamp_ms }
    }

    /// Attach a sequence index, producing a session frame
    pub fn sequenced(self, sequence: u64) -> Frame {
        Frame { data: self.data, timestamp_ms: self.timestamp_ms, sequence }
    }
}

/// One captured or sampled image inside a session.
///
/// Payloads are reference counted, so cloning a frame never copies image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Encoded image payload
    pub data: Bytes,

    /// Capture timestamp in milliseconds since stream start
    pub timestamp_ms: u64,

    /// Contiguous index within the session, starting at 0
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(data: impl Into<Bytes>, timestamp_ms: u64, sequence: u64) -> Self {
        Self { data: data.into(), timestamp_ms, sequence }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A sealed, ordered, non-empty group of frames delivered in one request.
///
/// Batches are immutable once built. Cloning is cheap (one `Arc` bump), which lets
/// the uploader retry without copying payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    frames: Arc<[Frame]>,
}

impl Batch {
    /// Seal a list of frames into a batch.
    ///
    /// Returns `None` for an empty list, batches are never empty.
    pub fn seal(frames: Vec<Frame>) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        Some(Self { frames: frames.into() })
    }

    /// Frames in capture order
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of frames in the batch
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false, kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sequence index of the first frame
    pub fn first_sequence(&self) -> u64 {
        self.frames[0].sequence
    }

    /// Sequence index of the last frame
    pub fn last_sequence(&self) -> u64 {
        self.frames[self.frames.len() - 1].sequence
    }

    /// Total payload bytes across all frames
    pub fn payload_bytes(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batches_cannot_be_sealed() {
        assert!(Batch::seal(Vec::new()).is_none());
    }

    #[test]
    fn batch_reports_sequence_range() {
        let frames = (5..8).map(|i| Frame::new(vec![i as u8; 3], i * 10, i)).collect();
        let batch = Batch::seal(frames).expect("non-empty");

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.first_sequence(), 5);
        assert_eq!(batch.last_sequence(), 7);
        assert_eq!(batch.payload_bytes(), 9);
    }

    #[test]
    fn cloning_a_batch_shares_frames() {
        let batch = Batch::seal(vec![Frame::new(vec![1, 2, 3], 0, 0)]).expect("non-empty");
        let clone = batch.clone();
        assert!(std::ptr::eq(batch.frames().as_ptr(), clone.frames().as_ptr()));
    }

    #[test]
    fn raw_frames_keep_timestamp_when_sequenced() {
        let frame = RawFrame::new(vec![0xFF, 0xD8], 1234).sequenced(9);
        assert_eq!(frame.timestamp_ms, 1234);
        assert_eq!(frame.sequence, 9);
        assert_eq!(frame.len(), 2);
    }
}
