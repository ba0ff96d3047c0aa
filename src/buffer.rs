//! Bounded frame accumulator

use tracing::trace;

use crate::types::{Batch, Frame};

/// Result of pushing a frame into a [`FrameBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferState {
    /// Frame stored, batch not yet full
    Accepting,
    /// Frame completed a batch, which is handed out sealed
    BatchReady(Batch),
}

/// Groups frames into batches of a fixed size.
///
/// The buffer has a single writer (the capture loop of one session). Between
/// handouts it holds at most `capacity - 1` frames. Sealing swaps the internal
/// vector for a fresh one, so a frame is in exactly one place at every point.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
    capacity: usize,
}

impl FrameBuffer {
    /// Create a buffer producing batches of `capacity` frames.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { frames: Vec::with_capacity(capacity), capacity }
    }

    /// Store a frame, sealing a batch when it fills the buffer
    pub fn push(&mut self, frame: Frame) -> BufferState {
        self.frames.push(frame);
        if self.frames.len() < self.capacity {
            return BufferState::Accepting;
        }

        let full = std::mem::replace(&mut self.frames, Vec::with_capacity(self.capacity));
        match Batch::seal(full) {
            Some(batch) => {
                trace!(
                    first = batch.first_sequence(),
                    last = batch.last_sequence(),
                    "Batch sealed"
                );
                BufferState::BatchReady(batch)
            }
            None => BufferState::Accepting,
        }
    }

    /// Seal whatever is buffered into an under-capacity batch.
    ///
    /// Returns `None` when the buffer is empty.
    pub fn flush_partial(&mut self) -> Option<Batch> {
        Batch::seal(std::mem::take(&mut self.frames))
    }

    /// Drop buffered frames, returning how many were discarded
    pub fn discard(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence.to_le_bytes().to_vec(), sequence * 33, sequence)
    }

    #[test]
    fn batch_of_one_is_ready_on_every_push() {
        let mut buffer = FrameBuffer::new(1);
        for i in 0..3 {
            match buffer.push(frame(i)) {
                BufferState::BatchReady(batch) => assert_eq!(batch.first_sequence(), i),
                BufferState::Accepting => panic!("expected a batch for frame {i}"),
            }
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn flush_partial_drains_remainder() {
        let mut buffer = FrameBuffer::new(4);
        assert_eq!(buffer.push(frame(0)), BufferState::Accepting);
        assert_eq!(buffer.push(frame(1)), BufferState::Accepting);

        let batch = buffer.flush_partial().expect("partial batch");
        assert_eq!(batch.len(), 2);
        assert!(buffer.flush_partial().is_none());
    }

    #[test]
    fn discard_reports_dropped_frames() {
        let mut buffer = FrameBuffer::new(3);
        buffer.push(frame(0));
        buffer.push(frame(1));
        assert_eq!(buffer.discard(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let mut buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert!(matches!(buffer.push(frame(0)), BufferState::BatchReady(_)));
    }

    proptest! {
        #[test]
        fn prop_batches_concatenate_to_pushed_sequence(
            capacity in 1usize..16,
            count in 0u64..200,
            flush in any::<bool>(),
        ) {
            let mut buffer = FrameBuffer::new(capacity);
            let mut emitted = Vec::new();
            let mut ready_at = Vec::new();

            for i in 0..count {
                if let BufferState::BatchReady(batch) = buffer.push(frame(i)) {
                    prop_assert_eq!(batch.len(), capacity);
                    ready_at.push(i + 1);
                    emitted.extend(batch.frames().iter().map(|f| f.sequence));
                }
                prop_assert!(buffer.len() < capacity);
            }

            // A batch is ready exactly every `capacity` pushes
            let expected: Vec<u64> =
                (1..=count).filter(|n| n % capacity as u64 == 0).collect();
            prop_assert_eq!(&ready_at, &expected);

            let remainder = count % capacity as u64;
            if flush {
                match buffer.flush_partial() {
                    Some(batch) => {
                        prop_assert_eq!(batch.len() as u64, remainder);
                        prop_assert!(batch.len() < capacity);
                        emitted.extend(batch.frames().iter().map(|f| f.sequence));
                    }
                    None => prop_assert_eq!(remainder, 0),
                }
                let all: Vec<u64> = (0..count).collect();
                prop_assert_eq!(emitted, all);
            } else {
                prop_assert_eq!(buffer.discard() as u64, remainder);
            }
        }
    }
}
