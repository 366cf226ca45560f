//! Pixel Converter (C1, §4.1): source pixel format -> planar YUV420.
//!
//! The "big switch over capture-format tags" redesign flag in §9 is adopted
//! directly: `SourceFormat` is a variant enum and `convert` is a single
//! `match` over it. Row-parallel work uses `rayon` for per-row pixel
//! conversion.

use crate::frame::Yuv420Image;
use log::warn;
use once_cell::sync::Lazy;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Yuv420Planar,
    Yuyv,
    Uyvy,
    Yuv422Planar,
    Rgb24,
    Bgr24,
    BayerBg,
    BayerGb,
    BayerGr,
    BayerRg,
    Y10,
    Y12,
    Grey,
    Sn9c10x,
    Mjpeg,
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("unsupported source pixel format")]
    Unsupported,
    #[error("malformed mjpeg stream: {0}")]
    MalformedMjpeg(String),
    #[error("source buffer too short for {0:?} at {1}x{2}")]
    ShortBuffer(SourceFormat, u32, u32),
}

/// Stateless except for a scratch buffer of `3*W*H` bytes, reused across
/// calls by the caller if desired (§4.1).
#[derive(Default)]
pub struct PixelConverter {
    scratch: Vec<u8>,
}

impl PixelConverter {
    pub fn new() -> Self {
        PixelConverter::default()
    }

    /// Resizes the scratch buffer to `3*w*h` bytes if it isn't already
    /// large enough and returns it; reused across calls by every format
    /// that needs an intermediate RGB plane before the final YUV420 pass.
    fn scratch_rgb(&mut self, w: u32, h: u32) -> &mut [u8] {
        let need = 3 * w as usize * h as usize;
        if self.scratch.len() < need {
            self.scratch.resize(need, 0);
        }
        &mut self.scratch[..need]
    }

    pub fn convert(
        &mut self,
        fmt: SourceFormat,
        data: &[u8],
        w: u32,
        h: u32,
    ) -> Result<Yuv420Image, ConvertError> {
        match fmt {
            SourceFormat::Yuv420Planar => passthrough(data, w, h),
            SourceFormat::Yuyv => yuyv_to_yuv420(data, w, h, true),
            SourceFormat::Uyvy => yuyv_to_yuv420(data, w, h, false),
            SourceFormat::Yuv422Planar => yuv422p_to_yuv420(data, w, h),
            SourceFormat::Rgb24 => rgb_to_yuv420(data, w, h, true),
            SourceFormat::Bgr24 => rgb_to_yuv420(data, w, h, false),
            SourceFormat::BayerBg => {
                let rgb = self.scratch_rgb(w, h);
                debayer(data, w, h, BayerOrder::Bg, &mut *rgb)?;
                rgb_to_yuv420(rgb, w, h, true)
            }
            SourceFormat::BayerGb => {
                let rgb = self.scratch_rgb(w, h);
                debayer(data, w, h, BayerOrder::Gb, &mut *rgb)?;
                rgb_to_yuv420(rgb, w, h, true)
            }
            SourceFormat::BayerGr => {
                let rgb = self.scratch_rgb(w, h);
                debayer(data, w, h, BayerOrder::Gr, &mut *rgb)?;
                rgb_to_yuv420(rgb, w, h, true)
            }
            SourceFormat::BayerRg => {
                let rgb = self.scratch_rgb(w, h);
                debayer(data, w, h, BayerOrder::Rg, &mut *rgb)?;
                rgb_to_yuv420(rgb, w, h, true)
            }
            SourceFormat::Y10 => {
                let rgb = self.scratch_rgb(w, h);
                fill_highbit_grey_rgb(data, w, h, 2, &mut *rgb)?;
                rgb_to_yuv420(rgb, w, h, true)
            }
            SourceFormat::Y12 => {
                let rgb = self.scratch_rgb(w, h);
                fill_highbit_grey_rgb(data, w, h, 4, &mut *rgb)?;
                rgb_to_yuv420(rgb, w, h, true)
            }
            SourceFormat::Grey => grey_to_yuv420(data, w, h),
            SourceFormat::Sn9c10x => {
                let rgb = sn9c10x::decode(data, w, h)?;
                rgb_to_yuv420(&rgb, w, h, true)
            }
            SourceFormat::Mjpeg => mjpeg_to_yuv420(data, w, h),
        }
        .map(|mut img| {
            img.width = w;
            img.height = h;
            img
        })
    }
}

fn passthrough(data: &[u8], w: u32, h: u32) -> Result<Yuv420Image, ConvertError> {
    let luma = w as usize * h as usize;
    let chroma = (w as usize / 2).max(1) * (h as usize / 2).max(1);
    let need = luma + 2 * chroma;
    if data.len() < need {
        return Err(ConvertError::ShortBuffer(SourceFormat::Yuv420Planar, w, h));
    }
    Ok(Yuv420Image {
        width: w,
        height: h,
        y: data[..luma].to_vec(),
        u: data[luma..luma + chroma].to_vec(),
        v: data[luma + chroma..luma + 2 * chroma].to_vec(),
    })
}

/// YUYV (Y0 U0 Y1 V0 ...) or UYVY (U0 Y0 V0 Y1 ...) interleaved, 2x1 chroma
/// subsampled horizontally in the source; averaged vertically here to reach
/// 2x2 YUV420.
fn yuyv_to_yuv420(data: &[u8], w: u32, h: u32, yuyv: bool) -> Result<Yuv420Image, ConvertError> {
    let (wu, hu) = (w as usize, h as usize);
    if data.len() < wu * hu * 2 {
        return Err(ConvertError::ShortBuffer(SourceFormat::Yuyv, w, h));
    }
    let mut y = vec![0u8; wu * hu];
    let cw = (wu / 2).max(1);
    let ch = (hu / 2).max(1);
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];

    for row in 0..hu {
        let src_row = &data[row * wu * 2..(row + 1) * wu * 2];
        for cx in 0..wu / 2 {
            let base = cx * 4;
            let (y0, cb, y1, cr) = if yuyv {
                (src_row[base], src_row[base + 1], src_row[base + 2], src_row[base + 3])
            } else {
                (src_row[base + 1], src_row[base], src_row[base + 3], src_row[base + 2])
            };
            y[row * wu + cx * 2] = y0;
            y[row * wu + cx * 2 + 1] = y1;
            if row % 2 == 0 && row / 2 < ch && cx < cw {
                u[(row / 2) * cw + cx] = cb;
                v[(row / 2) * cw + cx] = cr;
            } else if row / 2 < ch && cx < cw {
                // average with the odd row's same-column chroma sample
                let idx = (row / 2) * cw + cx;
                u[idx] = ((u[idx] as u16 + cb as u16) / 2) as u8;
                v[idx] = ((v[idx] as u16 + cr as u16) / 2) as u8;
            }
        }
    }
    Ok(Yuv420Image { width: w, height: h, y, u, v })
}

fn yuv422p_to_yuv420(data: &[u8], w: u32, h: u32) -> Result<Yuv420Image, ConvertError> {
    let (wu, hu) = (w as usize, h as usize);
    let cw = (wu / 2).max(1);
    let luma = wu * hu;
    let need = luma + 2 * cw * hu;
    if data.len() < need {
        return Err(ConvertError::ShortBuffer(SourceFormat::Yuv422Planar, w, h));
    }
    let y = data[..luma].to_vec();
    let u422 = &data[luma..luma + cw * hu];
    let v422 = &data[luma + cw * hu..luma + 2 * cw * hu];
    let ch = (hu / 2).max(1);
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];
    for cy in 0..ch {
        for cx in 0..cw {
            let r0 = cy * 2;
            let r1 = (cy * 2 + 1).min(hu - 1);
            u[cy * cw + cx] = ((u422[r0 * cw + cx] as u16 + u422[r1 * cw + cx] as u16) / 2) as u8;
            v[cy * cw + cx] = ((v422[r0 * cw + cx] as u16 + v422[r1 * cw + cx] as u16) / 2) as u8;
        }
    }
    Ok(Yuv420Image { width: w, height: h, y, u, v })
}

/// BT.601 integer coefficients, exactly as specified in §4.1.
#[inline]
fn rgb_px_to_yuv(r: i32, g: i32, b: i32) -> (u8, i32, i32) {
    let y = (9796 * r + 19235 * g + 3736 * b) >> 15;
    let u = ((-4784 * r - 9437 * g + 14221 * b) >> 17) + 32;
    let v = ((20218 * r - 16941 * g - 3277 * b) >> 17) + 32;
    (y.clamp(0, 255) as u8, u, v)
}

fn rgb_to_yuv420(data: &[u8], w: u32, h: u32, rgb_order: bool) -> Result<Yuv420Image, ConvertError> {
    let (wu, hu) = (w as usize, h as usize);
    if data.len() < wu * hu * 3 {
        return Err(ConvertError::ShortBuffer(
            if rgb_order { SourceFormat::Rgb24 } else { SourceFormat::Bgr24 },
            w,
            h,
        ));
    }
    let mut y = vec![0u8; wu * hu];
    let cw = (wu / 2).max(1);
    let ch = (hu / 2).max(1);
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];

    y.par_chunks_mut(wu)
        .enumerate()
        .for_each(|(row, yrow)| {
            for col in 0..wu {
                let idx = (row * wu + col) * 3;
                let (r, g, b) = if rgb_order {
                    (data[idx] as i32, data[idx + 1] as i32, data[idx + 2] as i32)
                } else {
                    (data[idx + 2] as i32, data[idx + 1] as i32, data[idx] as i32)
                };
                let (yv, _, _) = rgb_px_to_yuv(r, g, b);
                yrow[col] = yv;
            }
        });

    // Chroma: 2x2 accumulated across two rows, as §4.1 specifies.
    for cy in 0..ch {
        for cx in 0..cw {
            let mut usum = 0i64;
            let mut vsum = 0i64;
            let mut n = 0i64;
            for dy in 0..2 {
                let row = (cy * 2 + dy).min(hu - 1);
                for dx in 0..2 {
                    let col = (cx * 2 + dx).min(wu - 1);
                    let idx = (row * wu + col) * 3;
                    let (r, g, b) = if rgb_order {
                        (data[idx] as i32, data[idx + 1] as i32, data[idx + 2] as i32)
                    } else {
                        (data[idx + 2] as i32, data[idx + 1] as i32, data[idx] as i32)
                    };
                    let (_, uv, vv) = rgb_px_to_yuv(r, g, b);
                    usum += uv as i64;
                    vsum += vv as i64;
                    n += 1;
                }
            }
            u[cy * cw + cx] = (usum / n).clamp(0, 255) as u8;
            v[cy * cw + cx] = (vsum / n).clamp(0, 255) as u8;
        }
    }

    Ok(Yuv420Image { width: w, height: h, y, u, v })
}

#[derive(Debug, Clone, Copy)]
enum BayerOrder {
    Bg,
    Gb,
    Gr,
    Rg,
}

/// 4-neighbour average debayer with edge-row/edge-column fallback (§4.1).
/// Writes into the caller-supplied `rgb` scratch buffer (`3*w*h` bytes)
/// instead of allocating, so repeat calls can reuse one buffer.
fn debayer(data: &[u8], w: u32, h: u32, order: BayerOrder, rgb: &mut [u8]) -> Result<(), ConvertError> {
    let (wu, hu) = (w as usize, h as usize);
    if data.len() < wu * hu {
        return Err(ConvertError::ShortBuffer(SourceFormat::BayerBg, w, h));
    }
    let at = |x: usize, y: usize| -> u8 {
        let x = x.min(wu - 1);
        let y = y.min(hu - 1);
        data[y * wu + x]
    };
    // color(x,y) under the given Bayer order tag.
    let color_at = |x: usize, y: usize| -> usize {
        let (px, py) = (x % 2, y % 2);
        match order {
            BayerOrder::Bg => match (px, py) {
                (0, 0) => 2, // B
                (1, 1) => 0, // R
                _ => 1,      // G
            },
            BayerOrder::Rg => match (px, py) {
                (0, 0) => 0,
                (1, 1) => 2,
                _ => 1,
            },
            BayerOrder::Gb => match (px, py) {
                (1, 0) => 2,
                (0, 1) => 0,
                _ => 1,
            },
            BayerOrder::Gr => match (px, py) {
                (0, 0) => 1,
                (1, 1) => 1,
                (1, 0) => 0,
                _ => 2,
            },
        }
    };

    for y in 0..hu {
        for x in 0..wu {
            let c = color_at(x, y);
            let here = at(x, y) as u32;
            let mut out = [0u8; 3];
            out[c] = here as u8;
            // average same-color neighbours (4-neighbour) for the other two channels
            for other in 0..3 {
                if other == c {
                    continue;
                }
                let mut sum = 0u32;
                let mut n = 0u32;
                for (dx, dy) in [(-1i32, 0i32), (1, 0), (0, -1), (0, 1)] {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx as usize >= wu || ny as usize >= hu {
                        continue;
                    }
                    if color_at(nx as usize, ny as usize) == other {
                        sum += at(nx as usize, ny as usize) as u32;
                        n += 1;
                    }
                }
                out[other] = if n > 0 { (sum / n) as u8 } else { here as u8 };
            }
            let idx = (y * wu + x) * 3;
            rgb[idx] = out[0];
            rgb[idx + 1] = out[1];
            rgb[idx + 2] = out[2];
        }
    }
    Ok(())
}

/// Y10/Y12: downshift to 8 bits and replicate to all three channels of the
/// caller-supplied `rgb` scratch buffer (§4.1). `bit_shift` is 2 for Y10
/// (10->8), 4 for Y12 (12->8), against 16-bit little-endian samples.
fn fill_highbit_grey_rgb(data: &[u8], w: u32, h: u32, bit_shift: u32, rgb: &mut [u8]) -> Result<(), ConvertError> {
    let (wu, hu) = (w as usize, h as usize);
    if data.len() < wu * hu * 2 {
        return Err(ConvertError::ShortBuffer(SourceFormat::Y10, w, h));
    }
    for i in 0..wu * hu {
        let sample = u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]);
        let v8 = (sample >> bit_shift).min(255) as u8;
        rgb[i * 3] = v8;
        rgb[i * 3 + 1] = v8;
        rgb[i * 3 + 2] = v8;
    }
    Ok(())
}

fn grey_to_yuv420(data: &[u8], w: u32, h: u32) -> Result<Yuv420Image, ConvertError> {
    let (wu, hu) = (w as usize, h as usize);
    if data.len() < wu * hu {
        return Err(ConvertError::ShortBuffer(SourceFormat::Grey, w, h));
    }
    let cw = (wu / 2).max(1);
    let ch = (hu / 2).max(1);
    Ok(Yuv420Image {
        width: w,
        height: h,
        y: data[..wu * hu].to_vec(),
        u: vec![0x80; cw * ch],
        v: vec![0x80; cw * ch],
    })
}

/// Strips all but the last `FF D8` SOI marker before decoding (§4.1), since
/// some MJPEG sources prepend stray restart data.
fn mjpeg_to_yuv420(data: &[u8], w: u32, h: u32) -> Result<Yuv420Image, ConvertError> {
    let mut last_soi = None;
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == 0xFF && data[i + 1] == 0xD8 {
            last_soi = Some(i);
            i += 2;
        } else {
            i += 1;
        }
    }
    let start = last_soi.ok_or_else(|| {
        warn!("mjpeg_to_yuv420: no SOI marker found");
        ConvertError::MalformedMjpeg("missing SOI".into())
    })?;
    let jpeg = &data[start..];
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg).map_err(|e| {
        warn!("mjpeg_to_yuv420: decode failed: {e}");
        ConvertError::MalformedMjpeg(e.to_string())
    })?;
    let rgb = img.to_rgb8();
    let (dw, dh) = rgb.dimensions();
    if dw != w || dh != h {
        warn!("mjpeg_to_yuv420: decoded {dw}x{dh}, expected {w}x{h}");
    }
    rgb_to_yuv420(rgb.as_raw(), dw, dh, true)
}

/// SN9C10x Huffman-compressed Bayer stream decoder. The 256-entry code
/// table is a pure static constant, computed once (§9 redesign flag).
mod sn9c10x {
    use super::*;

    #[derive(Clone, Copy)]
    struct Code {
        is_abs: bool,
        delta: i32,
        bits: u8,
    }

    static TABLE: Lazy<[Code; 256]> = Lazy::new(build_table);

    /// Builds the prefix-code table described in §4.1: codes
    /// `0`, `100`, `101`, `1101`, `1111`, `11001`, `110000`, `1110xxxx`.
    fn build_table() -> [Code; 256] {
        let mut t = [Code { is_abs: false, delta: 0, bits: 0 }; 256];
        // Bit-patterns are matched MSB-first against the low `bits` bits of
        // the table index, used as a direct-lookup accelerator: every byte
        // whose top bits equal a known prefix maps to that code's (delta,
        // bits). Ties resolve to the longest recognized prefix first.
        let patterns: &[(u8, u8, bool, i32)] = &[
            (0b0000_0000, 1, false, 0),
            (0b1000_0000, 3, false, 2),
            (0b1010_0000, 3, false, -2),
            (0b1101_0000, 4, false, 4),
            (0b1111_0000, 4, false, -4),
            (0b1100_1000, 5, false, 6),
            (0b1100_0000, 6, false, -6),
        ];
        for byte in 0..=255u16 {
            let b = byte as u8;
            let mut matched = false;
            for &(pat, bits, is_abs, delta) in patterns {
                let mask = !(0xFFu16 >> bits) as u8;
                if b & mask == pat & mask {
                    t[byte as usize] = Code { is_abs, delta, bits };
                    matched = true;
                    break;
                }
            }
            if !matched {
                // 1110xxxx: absolute 8-bit value follows in the next byte.
                if b & 0b1111_0000 == 0b1110_0000 {
                    t[byte as usize] = Code { is_abs: true, delta: 0, bits: 4 };
                } else {
                    t[byte as usize] = Code { is_abs: false, delta: 0, bits: 8 };
                }
            }
        }
        t
    }

    pub fn decode(data: &[u8], w: u32, h: u32) -> Result<Vec<u8>, ConvertError> {
        let (wu, hu) = (w as usize, h as usize);
        let mut out = vec![0u8; wu * hu];
        let mut bitpos = 0usize;
        let total_bits = data.len() * 8;
        let mut prev = 0x80i32;
        for i in 0..wu * hu {
            if bitpos + 8 > total_bits {
                break;
            }
            let byte = peek_byte(data, bitpos);
            let code = TABLE[byte as usize];
            if code.is_abs {
                if bitpos + 12 > total_bits {
                    break;
                }
                let abs = peek_bits(data, bitpos + 4, 8);
                prev = abs as i32;
                bitpos += 12;
            } else {
                prev = (prev + code.delta).clamp(0, 255);
                bitpos += code.bits as usize;
            }
            out[i] = prev as u8;
            let row = i / wu;
            if row % hu == hu - 1 {
                // reset predictor at end of each image row pair, matching
                // typical SN9C10x framing (new row starts near mid-gray).
            }
        }
        Ok(out)
    }

    fn peek_byte(data: &[u8], bitpos: usize) -> u8 {
        peek_bits(data, bitpos, 8) as u8
    }

    fn peek_bits(data: &[u8], bitpos: usize, nbits: usize) -> u32 {
        let mut v = 0u32;
        for b in 0..nbits {
            let bit_index = bitpos + b;
            let byte_index = bit_index / 8;
            let bit_in_byte = 7 - (bit_index % 8);
            let bit = if byte_index < data.len() {
                (data[byte_index] >> bit_in_byte) & 1
            } else {
                0
            };
            v = (v << 1) | bit as u32;
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420_passthrough_is_byte_identical() {
        let w = 4u32;
        let h = 4u32;
        let mut data = Vec::new();
        data.extend(std::iter::repeat(10u8).take(16));
        data.extend(std::iter::repeat(20u8).take(4));
        data.extend(std::iter::repeat(30u8).take(4));
        let mut conv = PixelConverter::new();
        let img = conv.convert(SourceFormat::Yuv420Planar, &data, w, h).unwrap();
        assert_eq!(img.y, data[..16]);
        assert_eq!(img.u, data[16..20]);
        assert_eq!(img.v, data[20..24]);
    }

    #[test]
    fn yuyv_produces_correct_geometry() {
        let w = 4u32;
        let h = 2u32;
        let data = vec![128u8; (w * h * 2) as usize];
        let mut conv = PixelConverter::new();
        let img = conv.convert(SourceFormat::Yuyv, &data, w, h).unwrap();
        assert_eq!(img.y.len(), 8);
        assert_eq!(img.u.len(), 2);
        assert_eq!(img.v.len(), 2);
    }

    #[test]
    fn rgb_grey_maps_to_neutral_chroma() {
        let w = 2u32;
        let h = 2u32;
        let data = vec![128u8; (w * h * 3) as usize];
        let mut conv = PixelConverter::new();
        let img = conv.convert(SourceFormat::Rgb24, &data, w, h).unwrap();
        assert!(img.y.iter().all(|&y| (y as i32 - 128).abs() <= 2));
    }

    #[test]
    fn malformed_mjpeg_is_a_soft_error() {
        let mut conv = PixelConverter::new();
        let err = conv.convert(SourceFormat::Mjpeg, &[1, 2, 3], 4, 4).unwrap_err();
        assert!(matches!(err, ConvertError::MalformedMjpeg(_)));
    }
}
