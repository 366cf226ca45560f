//! Per-camera Stream Slots (§3 "Stream Slot", §4.6): one slot per output
//! (full/source/motion), each serving MJPEG/MPEG-TS/JPEG snapshots to
//! independent consumer sets. The mutex-per-camera shape matches the
//! concurrency model in §5.

use super::SlotTag;
use crate::encoder;
use crate::frame::Yuv420Image;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct SlotCounters {
    jpg_cnct: AtomicU32,
    ts_cnct: AtomicU32,
    all_cnct: AtomicU32,
}

impl SlotCounters {
    fn total(&self) -> u32 {
        self.jpg_cnct.load(Ordering::SeqCst)
            + self.ts_cnct.load(Ordering::SeqCst)
            + self.all_cnct.load(Ordering::SeqCst)
    }
}

struct SlotInner {
    image: Option<Yuv420Image>,
    jpeg: Option<Vec<u8>>,
    consumed: bool,
}

impl Default for SlotInner {
    fn default() -> Self {
        SlotInner { image: None, jpeg: None, consumed: true }
    }
}

/// One Stream Slot (§3): latest decoded YUV, latest JPEG, connection
/// counters, and the `consumed` flag. Protected by a per-slot mutex, which
/// is the hub's only shared object (§5).
#[derive(Default)]
pub struct StreamSlot {
    inner: Mutex<SlotInner>,
    counters: SlotCounters,
    /// Set once the owning pipeline has produced at least one frame
    /// (§3 "passflag").
    passflag: std::sync::atomic::AtomicBool,
}

impl StreamSlot {
    pub fn acquire(&self, kind: super::ConsumerKind) {
        match kind {
            super::ConsumerKind::Jpeg => self.counters.jpg_cnct.fetch_add(1, Ordering::SeqCst),
            super::ConsumerKind::Ts => self.counters.ts_cnct.fetch_add(1, Ordering::SeqCst),
            super::ConsumerKind::AllComposite => self.counters.all_cnct.fetch_add(1, Ordering::SeqCst),
        };
    }

    /// Releases a consumer slot; frees slot buffers once every counter
    /// reaches zero and `passflag` is set (§3 "Stream Slot" lifetime).
    pub fn release(&self, kind: super::ConsumerKind) {
        let prev = match kind {
            super::ConsumerKind::Jpeg => self.counters.jpg_cnct.fetch_sub(1, Ordering::SeqCst),
            super::ConsumerKind::Ts => self.counters.ts_cnct.fetch_sub(1, Ordering::SeqCst),
            super::ConsumerKind::AllComposite => self.counters.all_cnct.fetch_sub(1, Ordering::SeqCst),
        };
        let _ = prev;
        if self.counters.total() == 0 && self.passflag.load(Ordering::SeqCst) {
            let mut inner = self.inner.lock().unwrap();
            inner.image = None;
            inner.jpeg = None;
        }
    }

    pub fn has_consumers(&self) -> bool {
        self.counters.total() > 0
    }

    /// Called by the owning pipeline. Allocates slot buffers lazily when
    /// any counter is > 0 (§4.6 `publish`).
    pub fn publish(&self, image: Yuv420Image) {
        self.passflag.store(true, Ordering::SeqCst);
        if !self.has_consumers() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.image = Some(image);
        inner.consumed = false;
    }

    /// Encodes the slot's YUV to JPEG at `quality` iff `consumed == false`,
    /// caches it, returns a copy (§4.6 `snapshot_jpeg`). The Streaming Hub
    /// never fails a publish or a read — on an empty slot this returns
    /// `None` rather than an error (§7).
    pub fn snapshot_jpeg(&self, quality: u8) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.consumed {
            let image = inner.image.clone()?;
            match encoder::encode_jpeg(&image, quality) {
                Ok(bytes) => {
                    inner.jpeg = Some(bytes.clone());
                    inner.consumed = true;
                    return Some(bytes);
                }
                Err(_) => return inner.jpeg.clone(),
            }
        }
        inner.jpeg.clone()
    }

    pub fn latest_image(&self) -> Option<Yuv420Image> {
        self.inner.lock().unwrap().image.clone()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.inner.lock().unwrap().image.as_ref().map(|i| (i.width, i.height))
    }
}

/// Per-camera object holding the five Stream Slots (§4.6).
pub struct StreamingHub {
    slots: std::collections::HashMap<SlotTag, StreamSlot>,
}

impl StreamingHub {
    pub fn new() -> Self {
        let mut slots = std::collections::HashMap::new();
        for tag in SlotTag::all() {
            slots.insert(tag, StreamSlot::default());
        }
        StreamingHub { slots }
    }

    pub fn slot(&self, tag: SlotTag) -> &StreamSlot {
        &self.slots[&tag]
    }
}

impl Default for StreamingHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::ConsumerKind;

    #[test]
    fn publish_without_consumers_does_not_allocate() {
        let hub = StreamingHub::new();
        let slot = hub.slot(SlotTag::Full);
        slot.publish(Yuv420Image::neutral_gray(4, 4));
        assert!(slot.latest_image().is_none());
    }

    #[test]
    fn snapshot_jpeg_roundtrips_dimensions() {
        let hub = StreamingHub::new();
        let slot = hub.slot(SlotTag::Full);
        slot.acquire(ConsumerKind::Jpeg);
        slot.publish(Yuv420Image::neutral_gray(8, 8));
        let bytes = slot.snapshot_jpeg(70).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn buffers_freed_when_last_consumer_releases() {
        let hub = StreamingHub::new();
        let slot = hub.slot(SlotTag::Full);
        slot.acquire(ConsumerKind::Jpeg);
        slot.publish(Yuv420Image::neutral_gray(4, 4));
        assert!(slot.latest_image().is_some());
        slot.release(ConsumerKind::Jpeg);
        assert!(slot.latest_image().is_none());
    }
}
