//! Morphological despeckle passes applied to the thresholded diff image
//! before labeling (§4.3 "Despeckle"). The op string is a sequence of
//! single-letter passes, e.g. `"EedDl"` = erode-edge, erode-diamond,
//! dilate-edge, dilate-diamond, label.

/// Applies each character of `ops` in order, in place. Unknown characters
/// are ignored. `l` is a no-op marker consumed by the caller to decide
/// whether to run labeling, not a pixel operation here.
pub fn apply(ops: &str, buf: &mut [u8], w: usize, h: usize) {
    for op in ops.chars() {
        match op {
            'e' => erode(buf, w, h, Kernel::Diamond),
            'E' => erode(buf, w, h, Kernel::Edge),
            'd' => dilate(buf, w, h, Kernel::Diamond),
            'D' => dilate(buf, w, h, Kernel::Edge),
            _ => {}
        }
    }
}

#[derive(Clone, Copy)]
enum Kernel {
    /// 4-neighbour (N/S/E/W) diamond kernel.
    Diamond,
    /// 8-neighbour kernel including diagonals, used for edge-sensitive
    /// passes.
    Edge,
}

fn neighbours(kernel: Kernel) -> &'static [(i32, i32)] {
    match kernel {
        Kernel::Diamond => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
        Kernel::Edge => &[(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)],
    }
}

fn erode(buf: &mut [u8], w: usize, h: usize, kernel: Kernel) {
    let src = buf.to_vec();
    let offsets = neighbours(kernel);
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if src[idx] == 0 {
                continue;
            }
            let mut keep = true;
            for &(dx, dy) in offsets {
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h || src[ny as usize * w + nx as usize] == 0 {
                    keep = false;
                    break;
                }
            }
            buf[idx] = if keep { src[idx] } else { 0 };
        }
    }
}

fn dilate(buf: &mut [u8], w: usize, h: usize, kernel: Kernel) {
    let src = buf.to_vec();
    let offsets = neighbours(kernel);
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if src[idx] != 0 {
                continue;
            }
            for &(dx, dy) in offsets {
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h && src[ny as usize * w + nx as usize] != 0 {
                    buf[idx] = 255;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erode_diamond_removes_single_pixel_speckle() {
        let w = 5;
        let h = 5;
        let mut buf = vec![0u8; w * h];
        buf[2 * w + 2] = 255; // isolated speckle
        apply("e", &mut buf, w, h);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn dilate_edge_grows_region() {
        let w = 5;
        let h = 5;
        let mut buf = vec![0u8; w * h];
        buf[2 * w + 2] = 255;
        apply("D", &mut buf, w, h);
        assert!(buf[2 * w + 1] != 0 || buf[1 * w + 1] != 0);
    }
}
