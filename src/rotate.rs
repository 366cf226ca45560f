//! Rotate/flip collaborator (§4.1 "Rotate", §10 per-camera `rotate`/
//! `flip_axis`). Pure pixel-plane array transforms; no crate expresses
//! YUV-plane rotation idiomatically, so this is hand-written.

use crate::frame::Yuv420Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(deg: i32) -> Self {
        match deg.rem_euclid(360) {
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => Rotation::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlipAxis {
    #[default]
    None,
    Horizontal,
    Vertical,
}

fn rotate_plane(plane: &[u8], w: usize, h: usize, rot: Rotation) -> (Vec<u8>, usize, usize) {
    match rot {
        Rotation::None => (plane.to_vec(), w, h),
        Rotation::Deg180 => {
            let mut out = plane.to_vec();
            out.reverse();
            (out, w, h)
        }
        Rotation::Deg90 => {
            let mut out = vec![0u8; w * h];
            for y in 0..h {
                for x in 0..w {
                    let nx = h - 1 - y;
                    let ny = x;
                    out[ny * h + nx] = plane[y * w + x];
                }
            }
            (out, h, w)
        }
        Rotation::Deg270 => {
            let mut out = vec![0u8; w * h];
            for y in 0..h {
                for x in 0..w {
                    let nx = y;
                    let ny = w - 1 - x;
                    out[ny * h + nx] = plane[y * w + x];
                }
            }
            (out, h, w)
        }
    }
}

fn flip_plane(plane: &[u8], w: usize, h: usize, axis: FlipAxis) -> Vec<u8> {
    match axis {
        FlipAxis::None => plane.to_vec(),
        FlipAxis::Horizontal => {
            let mut out = vec![0u8; w * h];
            for y in 0..h {
                for x in 0..w {
                    out[y * w + (w - 1 - x)] = plane[y * w + x];
                }
            }
            out
        }
        FlipAxis::Vertical => {
            let mut out = vec![0u8; w * h];
            for y in 0..h {
                out[(h - 1 - y) * w..(h - y) * w].copy_from_slice(&plane[y * w..(y + 1) * w]);
            }
            out
        }
    }
}

/// Applies rotation then flip to every plane of a YUV420 image, halving
/// the chroma dimensions as `Yuv420Image` requires.
pub fn apply(image: &Yuv420Image, rotation: Rotation, flip: FlipAxis) -> Yuv420Image {
    let w = image.width as usize;
    let h = image.height as usize;
    let cw = (w / 2).max(1);
    let ch = (h / 2).max(1);

    let (mut y, yw, yh) = rotate_plane(&image.y, w, h, rotation);
    let (mut u, cw2, ch2) = rotate_plane(&image.u, cw, ch, rotation);
    let (mut v, _, _) = rotate_plane(&image.v, cw, ch, rotation);

    y = flip_plane(&y, yw, yh, flip);
    u = flip_plane(&u, cw2, ch2, flip);
    v = flip_plane(&v, cw2, ch2, flip);

    Yuv420Image {
        width: yw as u32,
        height: yh as u32,
        y,
        u,
        v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deg180_reverses_every_plane() {
        let mut img = Yuv420Image::blank(2, 2, 0);
        img.y = vec![1, 2, 3, 4];
        let out = apply(&img, Rotation::Deg180, FlipAxis::None);
        assert_eq!(out.y, vec![4, 3, 2, 1]);
        assert_eq!(out.width, 2);
        assert_eq!(out.height, 2);
    }

    #[test]
    fn deg90_swaps_dimensions() {
        let mut img = Yuv420Image::blank(4, 2, 0);
        img.y = (0..8).collect();
        let out = apply(&img, Rotation::Deg90, FlipAxis::None);
        assert_eq!(out.width, 2);
        assert_eq!(out.height, 4);
    }

    #[test]
    fn horizontal_flip_mirrors_each_row() {
        let mut img = Yuv420Image::blank(2, 2, 0);
        img.y = vec![1, 2, 3, 4];
        let out = apply(&img, Rotation::None, FlipAxis::Horizontal);
        assert_eq!(out.y, vec![2, 1, 4, 3]);
    }
}
