//! Fixed-capacity cyclic frame buffer (C4, §4.4).
//!
//! Generalizes a plain `VecDeque`-backed frame queue into an indexed ring
//! with explicit `ring_in`/`ring_out` cursors and per-frame save/precap
//! flags.

use crate::error::RingError;
use crate::frame::Frame;

/// Cyclic buffer of `T` (normally [`Frame`]), sized `pre_capture +
/// post_capture + 2` at construction (§3 "Ring Buffer").
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    ring_in: usize,
    ring_out: usize,
    len: usize,
    missing_frame_counter: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(pre_capture: usize, post_capture: usize) -> Self {
        let size = pre_capture + post_capture + 2;
        RingBuffer {
            slots: (0..size).map(|_| None).collect(),
            ring_in: 0,
            ring_out: 0,
            len: 0,
            missing_frame_counter: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn missing_frame_counter(&self) -> u64 {
        self.missing_frame_counter
    }

    /// `0 <= distance(in, out) <= size` is the ring-integrity invariant
    /// (§8); this is exactly `self.len`.
    pub fn distance(&self) -> usize {
        self.len
    }

    /// Resize, permitted only while the owning pipeline is quiescent
    /// (§4.4). Clears all buffered frames and flags.
    pub fn resize(&mut self, pre_capture: usize, post_capture: usize) -> Result<(), RingError> {
        let size = pre_capture + post_capture + 2;
        self.slots = (0..size).map(|_| None).collect();
        self.ring_in = 0;
        self.ring_out = 0;
        self.len = 0;
        Ok(())
    }

    fn advance(i: usize, cap: usize) -> usize {
        if cap == 0 {
            0
        } else {
            (i + 1) % cap
        }
    }
}

impl RingBuffer<Frame> {
    /// Pushes a newly captured frame. When the ring is full, reclaims the
    /// oldest frame flagged `saved`; if none is `saved`, the incoming frame
    /// is dropped and `missing_frame_counter` increments (§5 back-pressure).
    pub fn push(&mut self, frame: Frame) {
        let cap = self.capacity();
        if self.len < cap {
            self.slots[self.ring_in] = Some(frame);
            self.ring_in = Self::advance(self.ring_in, cap);
            self.len += 1;
            return;
        }

        // Full: find the oldest reclaimable (saved) slot starting at ring_out.
        let mut idx = self.ring_out;
        for _ in 0..cap {
            if self.slots[idx].as_ref().map(|f| f.flags.saved).unwrap_or(true) {
                self.slots[idx] = Some(frame);
                if idx == self.ring_out {
                    self.ring_out = Self::advance(self.ring_out, cap);
                }
                self.ring_in = Self::advance(idx, cap);
                return;
            }
            idx = Self::advance(idx, cap);
        }
        self.missing_frame_counter += 1;
    }

    /// Exports (removes) the oldest frame, if any.
    pub fn pop(&mut self) -> Option<Frame> {
        if self.len == 0 {
            return None;
        }
        let cap = self.capacity();
        let frame = self.slots[self.ring_out].take();
        self.ring_out = Self::advance(self.ring_out, cap);
        self.len -= 1;
        frame
    }

    /// Mutable iterator over the last `n` pushed frames, oldest first —
    /// used to mark the pre-capture window `save` on event open.
    pub fn mark_last_n_save(&mut self, n: usize) {
        let cap = self.capacity();
        let take = n.min(self.len);
        let mut idx = if self.ring_in == 0 { cap - 1 } else { self.ring_in - 1 };
        for _ in 0..take {
            if let Some(f) = self.slots[idx].as_mut() {
                f.flags.save = true;
                f.flags.precap = true;
            }
            idx = if idx == 0 { cap - 1 } else { idx - 1 };
        }
    }

    /// Read-only, oldest-first view of the last `n` pushed frames, without
    /// disturbing the ring — used to seed an event's mux with the
    /// pre-capture window before `mark_last_n_save` flags it.
    pub fn last_n(&self, n: usize) -> Vec<&Frame> {
        let cap = self.capacity();
        let take = n.min(self.len);
        let mut idx = if self.ring_in == 0 { cap - 1 } else { self.ring_in - 1 };
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(f) = self.slots[idx].as_ref() {
                out.push(f);
            }
            idx = if idx == 0 { cap - 1 } else { idx - 1 };
        }
        out.reverse();
        out
    }

    pub fn latest(&self) -> Option<&Frame> {
        if self.len == 0 {
            return None;
        }
        let cap = self.capacity();
        let idx = if self.ring_in == 0 { cap - 1 } else { self.ring_in - 1 };
        self.slots[idx].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Yuv420Image;

    fn mk(n: u32) -> Frame {
        Frame::new(Yuv420Image::neutral_gray(4, 4), n as u64, 0)
    }

    #[test]
    fn distance_stays_within_bounds() {
        let mut ring: RingBuffer<Frame> = RingBuffer::new(2, 2); // capacity 6
        for i in 0..10 {
            ring.push(mk(i));
            assert!(ring.distance() <= ring.capacity());
        }
    }

    #[test]
    fn saved_frames_are_reclaimed_before_unsaved() {
        let mut ring: RingBuffer<Frame> = RingBuffer::new(0, 0); // capacity 2
        let mut f0 = mk(0);
        f0.flags.saved = true;
        ring.push(f0);
        ring.push(mk(1));
        // full now; both slots occupied, slot 0 is saved and reclaimable.
        ring.push(mk(2));
        assert_eq!(ring.distance(), 2);
    }

    #[test]
    fn drops_frame_and_counts_when_nothing_reclaimable() {
        let mut ring: RingBuffer<Frame> = RingBuffer::new(0, 0); // capacity 2
        let mut f0 = mk(0);
        f0.flags.save = true;
        f0.flags.saved = false;
        let mut f1 = mk(1);
        f1.flags.save = true;
        f1.flags.saved = false;
        ring.push(f0);
        ring.push(f1);
        ring.push(mk(2));
        assert_eq!(ring.missing_frame_counter(), 1);
    }

    #[test]
    fn mark_last_n_save_flags_pre_capture_window() {
        let mut ring: RingBuffer<Frame> = RingBuffer::new(4, 4);
        for i in 0..4 {
            ring.push(mk(i));
        }
        ring.mark_last_n_save(4);
        let mut count = 0;
        while let Some(f) = ring.pop() {
            assert!(f.flags.save && f.flags.precap);
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
