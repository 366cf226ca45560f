//! Overlay collaborator (§4.6 "Overlay"): draws the motion bounding box and
//! a timestamp caption onto a frame before it is published or muxed, using
//! `imageproc::drawing::draw_hollow_rect_mut` and `rusttype` for text.

use crate::frame::{Frame, LocationBox};
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("failed to read overlay font {0}: {1}")]
    Read(String, std::io::Error),
    #[error("overlay font at {0} could not be parsed")]
    Parse(String),
}

/// Loads a TrueType font from `path` (the Config Store's
/// `text_font_path`, §10). There is no bundled fallback glyph set: a
/// camera configured with overlay text enabled but no valid font path
/// fails loudly at startup rather than silently drawing nothing.
pub fn load_font(path: &str) -> Result<Font<'static>, DrawError> {
    let bytes = std::fs::read(path).map_err(|e| DrawError::Read(path.to_string(), e))?;
    Font::try_from_vec(bytes).ok_or_else(|| DrawError::Parse(path.to_string()))
}

/// Draws the largest motion box (if any) and a `%Y-%m-%d %H:%M:%S` caption
/// onto an RGB image, using a font loaded once by the caller (§4.6
/// "overlay" runs after detection, before publish/mux).
pub fn overlay(image: &mut RgbImage, location: &LocationBox, timestamp: DateTime<Utc>, font: Option<&Font<'static>>, draw_box: bool) {
    if draw_box && location.w > 0 && location.h > 0 {
        let rect = Rect::at(location.x, location.y).of_size(location.w as u32, location.h as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
    if let Some(font) = font {
        let scale = Scale { x: 16.0, y: 16.0 };
        let caption = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        draw_text_mut(image, TEXT_COLOR, 4, 4, scale, font, &caption);
    }
}

/// Convenience wrapper operating directly on a captured [`Frame`] (used by
/// the Camera Pipeline right before encoding a saved sample).
pub fn overlay_frame(frame: &Frame, font: Option<&Font<'static>>, draw_box: bool) -> RgbImage {
    let mut rgb = crate::encoder::yuv420_to_rgb_image(&frame.image);
    overlay(&mut rgb, &frame.location, frame.wall_time.into(), font, draw_box);
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Yuv420Image;

    #[test]
    fn overlay_leaves_image_dimensions_unchanged() {
        let img = Yuv420Image::neutral_gray(64, 64);
        let frame = Frame::new(img, 0, 0);
        let rgb = overlay_frame(&frame, None, true);
        assert_eq!(rgb.width(), 64);
        assert_eq!(rgb.height(), 64);
    }

    #[test]
    fn box_is_skipped_when_location_is_degenerate() {
        let img = Yuv420Image::neutral_gray(16, 16);
        let mut rgb = crate::encoder::yuv420_to_rgb_image(&img);
        let before = rgb.clone();
        overlay(&mut rgb, &LocationBox::default(), Utc::now(), None, true);
        assert_eq!(rgb, before);
    }

    #[test]
    fn missing_font_file_is_a_soft_error() {
        assert!(load_font("/nonexistent/path/does-not-exist.ttf").is_err());
    }
}
