//! # Capture Frame Chunking
//!
//! The capture device delivers float sample buffers of arbitrary, irregular
//! length (whatever the device callback hands over). The wire protocol wants
//! fixed-size transport frames. `FrameChunker` sits between the two: it
//! accumulates incoming samples and emits exact-size frames in strict FIFO
//! order, retaining any remainder for the next push.

use std::collections::VecDeque;

/// Accumulates irregular capture buffers into fixed-size transport frames.
///
/// ## Ordering:
/// Strictly FIFO; no sample is reordered, duplicated, or dropped. Every
/// emitted frame has exactly `frame_size` samples.
///
/// ## Memory:
/// The residual accumulator has no upper bound. If capture outpaces frame
/// consumption the buffer grows without limit; no backpressure policy
/// exists at this boundary. Known risk, accepted for now.
pub struct FrameChunker {
    buffer: VecDeque<f32>,
    frame_size: usize,
}

impl FrameChunker {
    pub fn new(frame_size: usize) -> Self {
        Self {
            // Room for one full frame plus a typical callback's remainder
            buffer: VecDeque::with_capacity(frame_size * 2),
            frame_size,
        }
    }

    /// Append one capture buffer and emit every completed transport frame.
    ///
    /// Returns zero or more frames of exactly `frame_size` samples; the
    /// remainder stays in the accumulator.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend(samples.iter().copied());

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_size {
            let frame: Vec<f32> = self.buffer.drain(..self.frame_size).collect();
            frames.push(frame);
        }
        frames
    }

    /// Number of samples currently held back waiting for a full frame.
    pub fn residual_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a ramp so ordering mistakes are visible in the output.
    fn ramp(len: usize, start: usize) -> Vec<f32> {
        (0..len).map(|i| (start + i) as f32).collect()
    }

    #[test]
    fn test_exact_multiple_leaves_no_residual() {
        let frame_size = 2732;
        let mut chunker = FrameChunker::new(frame_size);

        // Irregular pushes summing to exactly 3 frames
        let total = frame_size * 3;
        let splits = [100, 2732, 50, frame_size * 2 - 150, 0];
        assert_eq!(splits.iter().sum::<usize>(), total);

        let mut emitted = Vec::new();
        let mut offset = 0;
        for len in splits {
            emitted.extend(chunker.push(&ramp(len, offset)));
            offset += len;
        }

        assert_eq!(emitted.len(), 3);
        assert_eq!(chunker.residual_len(), 0);

        // Each frame is exact-size and the concatenation is the original ramp
        let mut expected = 0.0f32;
        for frame in &emitted {
            assert_eq!(frame.len(), frame_size);
            for &sample in frame {
                assert_eq!(sample, expected);
                expected += 1.0;
            }
        }
    }

    #[test]
    fn test_small_pushes_accumulate() {
        let mut chunker = FrameChunker::new(8);

        assert!(chunker.push(&ramp(3, 0)).is_empty());
        assert!(chunker.push(&ramp(3, 3)).is_empty());
        assert_eq!(chunker.residual_len(), 6);

        let frames = chunker.push(&ramp(5, 6));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], ramp(8, 0));
        assert_eq!(chunker.residual_len(), 3);
    }

    #[test]
    fn test_one_push_emits_multiple_frames() {
        let mut chunker = FrameChunker::new(4);
        let frames = chunker.push(&ramp(11, 0));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], ramp(4, 0));
        assert_eq!(frames[1], ramp(4, 4));
        assert_eq!(chunker.residual_len(), 3);
    }

    #[test]
    fn test_empty_push_is_noop() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[]).is_empty());
        assert_eq!(chunker.residual_len(), 0);
    }
}
