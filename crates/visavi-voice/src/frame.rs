//! Fixed-size frame accumulation for streaming capture input.
//!
//! Device callbacks deliver sample batches of arbitrary length; downstream
//! stages (PCM encoding, VAD classification) want exact frames. The buffer
//! retains a partial frame across pushes and never emits an incomplete one;
//! the tail is discarded on `reset()` / teardown.

/// Default frame size in samples, matching the capture worklet buffer.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Accumulates raw f32 samples into fixed-size frames.
#[derive(Debug)]
pub struct StreamingFrameBuffer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl StreamingFrameBuffer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Consume a batch of samples, returning every full frame it completes.
    ///
    /// Each returned frame is an independent copy of exactly `frame_size`
    /// samples. A batch larger than the frame size yields multiple frames
    /// from a single call; leftover samples are retained toward the next one.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let space = self.frame_size - self.pending.len();
            let take = space.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(full);
            }
        }
        frames
    }

    /// Discard the retained partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Samples currently retained toward the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, offset: usize) -> Vec<f32> {
        (0..n).map(|i| (offset + i) as f32).collect()
    }

    #[test]
    fn emits_k_frames_and_retains_remainder() {
        let mut buf = StreamingFrameBuffer::new(8);
        // 3 * 8 + 5
        let frames = buf.push(&ramp(29, 0));
        assert_eq!(frames.len(), 3);
        assert_eq!(buf.pending(), 5);

        // topping up the remainder yields exactly one more frame
        let frames = buf.push(&ramp(3, 29));
        assert_eq!(frames.len(), 1);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn concatenation_preserves_sample_order() {
        let mut buf = StreamingFrameBuffer::new(4);
        let input = ramp(11, 0);
        let mut out = Vec::new();
        for frame in buf.push(&input) {
            assert_eq!(frame.len(), 4);
            out.extend(frame);
        }
        // round-trip: emitted frames equal the input up to the incomplete tail
        assert_eq!(out, ramp(8, 0));
        assert_eq!(buf.pending(), 3);
    }

    #[test]
    fn single_push_larger_than_frame_yields_multiple_frames() {
        let mut buf = StreamingFrameBuffer::new(2);
        let frames = buf.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(frames, vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
    }

    #[test]
    fn small_pushes_accumulate_across_calls() {
        let mut buf = StreamingFrameBuffer::new(4);
        assert!(buf.push(&[1.0]).is_empty());
        assert!(buf.push(&[2.0, 3.0]).is_empty());
        let frames = buf.push(&[4.0, 5.0]);
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(buf.pending(), 1);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut buf = StreamingFrameBuffer::new(4);
        buf.push(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.pending(), 3);
        buf.reset();
        assert_eq!(buf.pending(), 0);
        // samples after reset start a fresh frame
        let frames = buf.push(&[9.0, 9.0, 9.0, 9.0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![9.0; 4]);
    }
}
