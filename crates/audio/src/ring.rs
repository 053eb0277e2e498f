//! Bounded ring buffer of audio frames.
//!
//! Sits between the network receive path (producer) and the device playback
//! path (consumer). Writes reject when full (real-time audio would rather
//! drop a frame than grow a backlog) and reads never block: an empty ring
//! means the player substitutes silence.
//!
//! The mutex only covers the head/tail/full bookkeeping plus one slot move;
//! callers never hold it across I/O.

use std::sync::Mutex;

/// Fixed-capacity FIFO of frame buffers.
pub struct FrameRing {
    inner: Mutex<RingState>,
    capacity: usize,
}

struct RingState {
    slots: Box<[Option<Vec<u8>>]>,
    read_pos: usize,
    write_pos: usize,
    full: bool,
}

impl FrameRing {
    /// Create a ring with the given number of slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>().into();
        Self {
            inner: Mutex::new(RingState {
                slots,
                read_pos: 0,
                write_pos: 0,
                full: false,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a frame. Returns false (and drops the frame) when the ring is
    /// full; existing frames are never overwritten.
    pub fn write(&self, frame: Vec<u8>) -> bool {
        let mut state = self.inner.lock().unwrap();
        if state.full {
            return false;
        }
        let pos = state.write_pos;
        state.slots[pos] = Some(frame);
        state.write_pos = (pos + 1) % self.capacity;
        if state.write_pos == state.read_pos {
            state.full = true;
        }
        true
    }

    /// Take the oldest frame, or `None` when empty.
    pub fn read(&self) -> Option<Vec<u8>> {
        let mut state = self.inner.lock().unwrap();
        if state.read_pos == state.write_pos && !state.full {
            return None;
        }
        let pos = state.read_pos;
        let frame = state.slots[pos].take();
        state.read_pos = (pos + 1) % self.capacity;
        state.full = false;
        frame
    }

    /// Occupied fraction in [0, 1].
    pub fn usage(&self) -> f32 {
        let state = self.inner.lock().unwrap();
        if state.full {
            return 1.0;
        }
        let used = if state.write_pos >= state.read_pos {
            state.write_pos - state.read_pos
        } else {
            self.capacity - state.read_pos + state.write_pos
        };
        used as f32 / self.capacity as f32
    }

    pub fn len(&self) -> usize {
        let state = self.inner.lock().unwrap();
        if state.full {
            return self.capacity;
        }
        if state.write_pos >= state.read_pos {
            state.write_pos - state.read_pos
        } else {
            self.capacity - state.read_pos + state.write_pos
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard everything.
    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.read_pos = 0;
        state.write_pos = 0;
        state.full = false;
    }
}
