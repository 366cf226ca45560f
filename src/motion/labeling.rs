//! 4-connected component labeling on a thresholded diff image (§4.3
//! "Labeling"), kept as its own stage with a single entry point.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LabelBox {
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
    pub pixel_count: u32,
}

impl LabelBox {
    pub fn width(&self) -> i32 {
        (self.maxx - self.minx + 1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.maxy - self.miny + 1).max(0)
    }
}

#[derive(Debug, Default)]
pub struct LabelResult {
    pub total_labels: u32,
    pub largest_label: u32,
    pub largest_box: LabelBox,
    pub stddev_x: f64,
    pub stddev_y: f64,
    pub stddev_xy: f64,
}

/// Labels the thresholded `diff` image (non-zero = candidate motion pixel),
/// capping any one component at `labelgroup_max` accepted pixels and
/// ignoring components whose total area exceeds `labelsize_max`.
pub fn label(diff: &[u8], w: usize, h: usize, labelgroup_max: u32, labelsize_max: u32) -> LabelResult {
    let mut labels = vec![0u32; w * h];
    let mut next_label = 0u32;
    let mut boxes: Vec<LabelBox> = Vec::new();
    let mut sums: Vec<(i64, i64, i64, i64, i64)> = Vec::new(); // sum_x, sum_y, sum_x2, sum_y2, sum_xy

    let mut stack: Vec<usize> = Vec::new();
    for start in 0..w * h {
        if diff[start] == 0 || labels[start] != 0 {
            continue;
        }
        next_label += 1;
        let label_id = next_label;
        let mut bbox = LabelBox {
            minx: i32::MAX,
            maxx: i32::MIN,
            miny: i32::MAX,
            maxy: i32::MIN,
            pixel_count: 0,
        };
        let (mut sx, mut sy, mut sx2, mut sy2, mut sxy) = (0i64, 0i64, 0i64, 0i64, 0i64);

        stack.clear();
        stack.push(start);
        labels[start] = label_id;
        while let Some(idx) = stack.pop() {
            let x = (idx % w) as i32;
            let y = (idx / w) as i32;
            if bbox.pixel_count < labelgroup_max {
                bbox.minx = bbox.minx.min(x);
                bbox.maxx = bbox.maxx.max(x);
                bbox.miny = bbox.miny.min(y);
                bbox.maxy = bbox.maxy.max(y);
                bbox.pixel_count += 1;
                sx += x as i64;
                sy += y as i64;
                sx2 += (x * x) as i64;
                sy2 += (y * y) as i64;
                sxy += (x * y) as i64;
            }
            for (dx, dy) in [(-1i32, 0i32), (1, 0), (0, -1), (0, 1)] {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h {
                    continue;
                }
                let nidx = ny as usize * w + nx as usize;
                if diff[nidx] != 0 && labels[nidx] == 0 {
                    labels[nidx] = label_id;
                    stack.push(nidx);
                }
            }
        }

        if bbox.pixel_count <= labelsize_max {
            boxes.push(bbox);
            sums.push((sx, sy, sx2, sy2, sxy));
        } else {
            boxes.push(LabelBox::default());
            sums.push((0, 0, 0, 0, 0));
        }
    }

    let mut result = LabelResult {
        total_labels: next_label,
        ..Default::default()
    };
    let mut best: Option<(usize, u32)> = None;
    for (i, b) in boxes.iter().enumerate() {
        if best.map(|(_, c)| b.pixel_count > c).unwrap_or(true) {
            best = Some((i, b.pixel_count));
        }
    }
    if let Some((i, _)) = best {
        result.largest_label = (i + 1) as u32;
        result.largest_box = boxes[i];
        let n = boxes[i].pixel_count as f64;
        if n > 0.0 {
            let (sx, sy, sx2, sy2, sxy) = sums[i];
            let mx = sx as f64 / n;
            let my = sy as f64 / n;
            result.stddev_x = ((sx2 as f64 / n) - mx * mx).max(0.0).sqrt();
            result.stddev_y = ((sy2 as f64 / n) - my * my).max(0.0).sqrt();
            result.stddev_xy = ((sxy as f64 / n) - mx * my).max(0.0).sqrt();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_disjoint_blobs_correctly() {
        let w = 10;
        let h = 10;
        let mut diff = vec![0u8; w * h];
        // Blob A: a 2x2 square at (0,0).
        diff[0 * w + 0] = 1;
        diff[0 * w + 1] = 1;
        diff[1 * w + 0] = 1;
        diff[1 * w + 1] = 1;
        // Blob B: a 2-pixel horizontal pair at (5,5)-(6,5), far from A.
        diff[5 * w + 5] = 1;
        diff[5 * w + 6] = 1;

        let result = label(&diff, w, h, 1000, 1000);
        assert_eq!(result.total_labels, 2);
        assert_eq!(result.largest_box.pixel_count, 4);
        assert_eq!(result.largest_box.minx, 0);
        assert_eq!(result.largest_box.maxx, 1);
    }

    #[test]
    fn labelgroup_max_caps_accepted_pixels_in_bbox() {
        let w = 5;
        let h = 1;
        let diff = vec![1u8; w * h];
        let result = label(&diff, w, h, 3, 1000);
        assert_eq!(result.largest_box.pixel_count, 3);
    }
}
