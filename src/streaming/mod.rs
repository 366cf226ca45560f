//! Streaming Hub (C6, §4.6): per-camera publish slots and the all-cameras
//! mosaic compositor, served over HTTP as MJPEG/MPEG-TS/single-JPEG.

pub mod hub;
pub mod http;
pub mod mosaic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotTag {
    Full,
    Sub,
    Motion,
    Source,
    Secondary,
}

impl SlotTag {
    pub fn all() -> [SlotTag; 5] {
        [SlotTag::Full, SlotTag::Sub, SlotTag::Motion, SlotTag::Source, SlotTag::Secondary]
    }

    /// Matches the `slot` path segment in §6's URL grammar.
    pub fn from_url_segment(s: &str) -> Option<Self> {
        Some(match s {
            "stream" => SlotTag::Full,
            "sub" => SlotTag::Sub,
            "motion" => SlotTag::Motion,
            "source" => SlotTag::Source,
            "secondary" => SlotTag::Secondary,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    Jpeg,
    Ts,
    AllComposite,
}
