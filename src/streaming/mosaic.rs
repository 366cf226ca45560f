//! Mosaic Builder / all-cameras composite (§3 "Mosaic Layout", §4.6).
//!
//! There is exactly one mosaic-layout code path in this crate, resolving
//! Open Question (a) in §9/SPEC_FULL.md §9: the reference implementation's
//! two duplicate layout implementations are collapsed into this single
//! `MosaicBuilder`.

use crate::frame::Yuv420Image;
use fast_image_resize::images::Image;
use fast_image_resize::{PixelType, ResizeAlg, ResizeOptions, Resizer};
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct CameraPosition {
    pub device_id: u32,
    pub row: u32,
    pub col: u32,
    /// Percent scale, or -1 to request row-uniform auto-scale (§3 "Mosaic
    /// Layout", §4.6 step 2).
    pub scale_percent: i32,
    pub user_offset_row: i32,
    pub user_offset_col: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlacedCamera {
    pub offset_row: u32,
    pub offset_col: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
}

#[derive(Debug, Default)]
pub struct MosaicLayout {
    pub width: u32,
    pub height: u32,
    pub placements: HashMap<u32, PlacedCamera>,
}

/// Pads up to the next multiple of 16, floored at 64 (§3 "Mosaic Layout"
/// derived quantities).
fn pad16_floor64(v: u32) -> u32 {
    v.max(64).div_ceil(16) * 16
}

/// Validates that positions are 1-based dense with no (row,col) collisions
/// (§4.6 step 1); on failure, falls back to a row-major two-column
/// auto-layout.
fn validate_or_fallback(cameras: &[CameraPosition]) -> Vec<CameraPosition> {
    if cameras.is_empty() {
        return Vec::new();
    }
    let max_row = cameras.iter().map(|c| c.row).max().unwrap_or(0);
    let mut seen = std::collections::HashSet::new();
    let mut ok = true;
    for c in cameras {
        if c.row == 0 || c.col == 0 {
            ok = false;
            break;
        }
        if !seen.insert((c.row, c.col)) {
            ok = false;
            break;
        }
    }
    if ok {
        for row in 1..=max_row {
            let cols: Vec<u32> = cameras.iter().filter(|c| c.row == row).map(|c| c.col).collect();
            if cols.is_empty() {
                ok = false;
                break;
            }
            let max_col = *cols.iter().max().unwrap();
            for col in 1..=max_col {
                if !cols.contains(&col) {
                    ok = false;
                    break;
                }
            }
            if !ok {
                break;
            }
        }
    }
    if ok {
        return cameras.to_vec();
    }
    warn!("mosaic layout invalid (duplicate/missing row or column); falling back to row-major two-column auto layout");
    cameras
        .iter()
        .enumerate()
        .map(|(i, c)| CameraPosition {
            row: (i / 2) as u32 + 1,
            col: (i % 2) as u32 + 1,
            ..*c
        })
        .collect()
}

pub struct MosaicBuilder;

impl MosaicBuilder {
    /// Recomputes the layout (§4.6 steps 1-6). Callers gate this on the
    /// layout's `reset` flag (startup, or any camera geometry change).
    pub fn compute_layout(cameras: &[CameraPosition]) -> MosaicLayout {
        let cameras = validate_or_fallback(cameras);
        if cameras.is_empty() {
            return MosaicLayout { width: 320, height: 240, placements: HashMap::new() };
        }

        let max_row = cameras.iter().map(|c| c.row).max().unwrap();
        let max_col = cameras.iter().map(|c| c.col).max().unwrap();

        // Step 2: row-uniform auto-scale target height per row.
        let mut row_target_height = HashMap::new();
        for row in 1..=max_row {
            let in_row: Vec<&CameraPosition> = cameras.iter().filter(|c| c.row == row).collect();
            if in_row.is_empty() {
                continue;
            }
            let fixed_max = in_row
                .iter()
                .filter(|c| c.scale_percent != -1)
                .map(|c| c.height)
                .max();
            let target = fixed_max.unwrap_or_else(|| in_row.iter().map(|c| c.height).max().unwrap());
            row_target_height.insert(row, target);
        }

        // Compute each camera's scaled (width, height).
        let mut scaled: HashMap<u32, (u32, u32)> = HashMap::new();
        for c in &cameras {
            let (w, h) = if c.scale_percent == -1 {
                let target_h = row_target_height[&c.row];
                let w = (c.width as u64 * target_h as u64 / c.height.max(1) as u64) as u32;
                (w, target_h)
            } else {
                let pct = c.scale_percent.max(1) as u64;
                (
                    (c.width as u64 * pct / 100) as u32,
                    (c.height as u64 * pct / 100) as u32,
                )
            };
            scaled.insert(c.device_id, (pad16_floor64(w), pad16_floor64(h)));
        }

        // Row heights / column widths from the scaled sizes.
        let mut row_height = HashMap::new();
        for row in 1..=max_row {
            let h = cameras
                .iter()
                .filter(|c| c.row == row)
                .map(|c| scaled[&c.device_id].1)
                .max()
                .unwrap_or(0);
            row_height.insert(row, h);
        }
        let mut col_width = HashMap::new();
        for col in 1..=max_col {
            let w = cameras
                .iter()
                .filter(|c| c.col == col)
                .map(|c| scaled[&c.device_id].0)
                .max()
                .unwrap_or(0);
            col_width.insert(col, w);
        }

        let mut row_top = HashMap::new();
        let mut cum = 0u32;
        for row in 1..=max_row {
            row_top.insert(row, cum);
            cum += row_height[&row];
        }
        let total_height = cum;

        let mut col_left = HashMap::new();
        let mut cum = 0u32;
        for col in 1..=max_col {
            col_left.insert(col, cum);
            cum += col_width[&col];
        }
        let total_width = cum;

        let mut placements = HashMap::new();
        for c in &cameras {
            let (sw, sh) = scaled[&c.device_id];
            let row_h = row_height[&c.row];
            let col_w = col_width[&c.col];
            let mut offset_row = row_top[&c.row] + (row_h.saturating_sub(sh)) / 2;
            let mut offset_col = col_left[&c.col] + (col_w.saturating_sub(sw)) / 2;

            // Step 5: user offsets applied only if they keep the image
            // fully inside the mosaic bounds.
            let ur = offset_row as i64 + c.user_offset_row as i64;
            let uc = offset_col as i64 + c.user_offset_col as i64;
            if ur >= 0 && uc >= 0 && ur as u32 + sh <= total_height && uc as u32 + sw <= total_width {
                offset_row = ur as u32;
                offset_col = uc as u32;
            }

            placements.insert(
                c.device_id,
                PlacedCamera { offset_row, offset_col, scaled_width: sw, scaled_height: sh },
            );
        }

        if total_width == 0 || total_height == 0 {
            return MosaicLayout { width: 320, height: 240, placements: HashMap::new() };
        }

        MosaicLayout { width: total_width, height: total_height, placements }
    }

    /// Composites one mosaic frame: neutral gray background, bilinear
    /// resize of each active camera's latest published image into its
    /// placement (§4.6 "Compositing").
    pub fn composite(layout: &MosaicLayout, frames: &HashMap<u32, Yuv420Image>) -> Yuv420Image {
        let mut out = Yuv420Image::neutral_gray(layout.width, layout.height);
        for (id, placement) in &layout.placements {
            let Some(src) = frames.get(id) else { continue };
            let resized = resize_bilinear(src, placement.scaled_width, placement.scaled_height);
            blit(&mut out, &resized, placement.offset_col, placement.offset_row);
        }
        out
    }
}

fn resize_bilinear(src: &Yuv420Image, dst_w: u32, dst_h: u32) -> Yuv420Image {
    if src.width == dst_w && src.height == dst_h {
        return src.clone();
    }
    let y = resize_plane(&src.y, src.width, src.height, dst_w, dst_h);
    let cw_src = (src.width / 2).max(1);
    let ch_src = (src.height / 2).max(1);
    let cw_dst = (dst_w / 2).max(1);
    let ch_dst = (dst_h / 2).max(1);
    let u = resize_plane(&src.u, cw_src, ch_src, cw_dst, ch_dst);
    let v = resize_plane(&src.v, cw_src, ch_src, cw_dst, ch_dst);
    Yuv420Image { width: dst_w, height: dst_h, y, u, v }
}

/// Resizes a single 8-bit plane with `fast_image_resize`'s bilinear
/// algorithm, treating each plane as a single-channel `U8` image.
fn resize_plane(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return vec![0x80; (dw * dh) as usize];
    }
    let src_image = match Image::from_vec_u8(sw, sh, src.to_vec(), PixelType::U8) {
        Ok(img) => img,
        Err(_) => return vec![0x80; (dw * dh) as usize],
    };
    let mut dst_image = Image::new(dw, dh, PixelType::U8);
    let mut resizer = Resizer::new();
    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));
    if resizer.resize(&src_image, &mut dst_image, Some(&options)).is_err() {
        return vec![0x80; (dw * dh) as usize];
    }
    dst_image.into_vec()
}

/// Copies `src`'s planes into `dst` at `(offset_col, offset_row)`. Each
/// luma row copies `dst_w` bytes of the source row; every other
/// destination row copies `dst_w/2` bytes of U and V (§4.6 "Compositing").
fn blit(dst: &mut Yuv420Image, src: &Yuv420Image, offset_col: u32, offset_row: u32) {
    for row in 0..src.height {
        let dy = offset_row + row;
        if dy >= dst.height {
            break;
        }
        let src_row = &src.y[(row * src.width) as usize..((row + 1) * src.width) as usize];
        let dst_start = (dy * dst.width + offset_col) as usize;
        let copy_len = src.width.min(dst.width.saturating_sub(offset_col)) as usize;
        dst.y[dst_start..dst_start + copy_len].copy_from_slice(&src_row[..copy_len]);
    }
    let cw_src = (src.width / 2).max(1);
    let ch_src = (src.height / 2).max(1);
    let cw_dst = (dst.width / 2).max(1);
    let c_offset_col = offset_col / 2;
    let c_offset_row = offset_row / 2;
    for row in 0..ch_src {
        let dy = c_offset_row + row;
        if dy >= (dst.height / 2).max(1) {
            break;
        }
        let src_row_u = &src.u[(row * cw_src) as usize..((row + 1) * cw_src) as usize];
        let src_row_v = &src.v[(row * cw_src) as usize..((row + 1) * cw_src) as usize];
        let dst_start = (dy * cw_dst + c_offset_col) as usize;
        let copy_len = cw_src.min(cw_dst.saturating_sub(c_offset_col)) as usize;
        dst.u[dst_start..dst_start + copy_len].copy_from_slice(&src_row_u[..copy_len]);
        dst.v[dst_start..dst_start + copy_len].copy_from_slice(&src_row_v[..copy_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam(id: u32, row: u32, col: u32, scale: i32, w: u32, h: u32) -> CameraPosition {
        CameraPosition { device_id: id, row, col, scale_percent: scale, user_offset_row: 0, user_offset_col: 0, width: w, height: h }
    }

    #[test]
    fn two_by_one_layout_matches_spec_scenario_2() {
        let cams = vec![cam(1, 1, 1, 100, 640, 480), cam(2, 1, 2, 100, 640, 480)];
        let layout = MosaicBuilder::compute_layout(&cams);
        assert_eq!(layout.width, 1280);
        assert_eq!(layout.height, 480);
        assert_eq!((layout.placements[&1].offset_row, layout.placements[&1].offset_col), (0, 0));
        assert_eq!((layout.placements[&2].offset_row, layout.placements[&2].offset_col), (0, 640));
    }

    #[test]
    fn auto_scale_layout_matches_spec_scenario_3() {
        let cams = vec![cam(1, 1, 1, -1, 640, 480), cam(2, 1, 2, 100, 1280, 720)];
        let layout = MosaicBuilder::compute_layout(&cams);
        assert_eq!(layout.height, 720);
        assert_eq!(layout.width, 960 + 1280);
        assert_eq!(layout.placements[&1].scaled_width, 960);
        assert_eq!(layout.placements[&1].scaled_height, 720);
    }

    #[test]
    fn every_placement_stays_within_mosaic_bounds() {
        let cams = vec![
            cam(1, 1, 1, 100, 640, 480),
            cam(2, 1, 2, 100, 320, 240),
            cam(3, 2, 1, 100, 800, 600),
        ];
        let layout = MosaicBuilder::compute_layout(&cams);
        for p in layout.placements.values() {
            assert!(p.offset_col + p.scaled_width <= layout.width);
            assert!(p.offset_row + p.scaled_height <= layout.height);
        }
    }

    #[test]
    fn duplicate_row_col_falls_back_to_row_major() {
        let cams = vec![cam(1, 1, 1, 100, 640, 480), cam(2, 1, 1, 100, 640, 480)];
        let layout = MosaicBuilder::compute_layout(&cams);
        assert_eq!(layout.placements.len(), 2);
        for p in layout.placements.values() {
            assert!(p.offset_col + p.scaled_width <= layout.width);
        }
    }

    #[test]
    fn empty_camera_list_yields_placeholder_mosaic() {
        let layout = MosaicBuilder::compute_layout(&[]);
        assert_eq!((layout.width, layout.height), (320, 240));
    }
}
