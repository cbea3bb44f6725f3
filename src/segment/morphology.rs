//! Binary morphology and connected components on trace masks.

use super::TraceMask;

/// 3×3 dilation followed by 3×3 erosion; bridges single-pixel breaks in the
/// stroke without thickening it permanently.
pub(crate) fn close_3x3(mask: &TraceMask) -> TraceMask {
    erode_3x3(&dilate_3x3(mask))
}

fn dilate_3x3(mask: &TraceMask) -> TraceMask {
    transform_3x3(mask, |any, _all| any)
}

fn erode_3x3(mask: &TraceMask) -> TraceMask {
    transform_3x3(mask, |_any, all| all)
}

fn transform_3x3(mask: &TraceMask, combine: fn(bool, bool) -> bool) -> TraceMask {
    let (w, h) = (mask.width, mask.height);
    let mut out = TraceMask::empty(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut any = false;
            let mut all = true;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    // Replicate padding: a stroke touching the crop border
                    // must not be eroded away there.
                    let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as usize;
                    let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as usize;
                    let v = mask.get(sx, sy);
                    any |= v;
                    all &= v;
                }
            }
            out.set(x, y, combine(any, all));
        }
    }
    out
}

/// Label 8-connected components. Returns a label map (0 = background) and
/// the pixel count per label, indexed by `label - 1`.
pub(crate) fn connected_components(mask: &TraceMask) -> (Vec<u32>, Vec<usize>) {
    let (w, h) = (mask.width, mask.height);
    let mut labels = vec![0u32; w * h];
    let mut sizes = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if !mask.data[start] || labels[start] != 0 {
            continue;
        }
        let label = sizes.len() as u32 + 1;
        let mut size = 0usize;
        stack.push(start);
        labels[start] = label;
        while let Some(idx) = stack.pop() {
            size += 1;
            let x = idx % w;
            let y = idx / w;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let nidx = ny as usize * w + nx as usize;
                    if mask.data[nidx] && labels[nidx] == 0 {
                        labels[nidx] = label;
                        stack.push(nidx);
                    }
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}
