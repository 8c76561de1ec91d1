//! Binary mask cleanup: morphology, enclosed-hole filling and small-region removal.
//!
//! Connected components are labelled with an explicit work stack and a visited
//! grid, using 8-connectivity, so arbitrarily large regions never recurse.

use image::Luma;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

use crate::imageops_cutout::Mask;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Morphological close (dilate then erode) with a square structuring element.
///
/// Fills gaps narrower than `2 * radius + 1` pixels.
pub fn close_mask(mask: &Mask, radius: u8) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    close(mask, Norm::LInf, radius)
}

/// Morphological open (erode then dilate) with a square structuring element.
///
/// Removes protrusions thinner than `2 * radius + 1` pixels.
pub fn open_mask(mask: &Mask, radius: u8) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    open(mask, Norm::LInf, radius)
}

/// One 8-connected region of equal-valued pixels.
struct Region {
    pixels: Vec<usize>,
    touches_border: bool,
}

/// Visits every connected region of `mask`, values compared as foreground
/// (`> 127`) or background.
fn for_each_region<F>(mask: &Mask, mut visit: F)
where
    F: FnMut(bool, &Region),
{
    let (width, height) = mask.dimensions();
    let (w, h) = (i64::from(width), i64::from(height));
    let raw = mask.as_raw();
    let mut visited = vec![false; raw.len()];
    let mut stack = Vec::with_capacity(64);

    for start in 0..raw.len() {
        if visited[start] {
            continue;
        }
        let is_foreground = raw[start] > 127;
        let mut region = Region {
            pixels: Vec::new(),
            touches_border: false,
        };

        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            region.pixels.push(idx);
            let x = (idx % width as usize) as i64;
            let y = (idx / width as usize) as i64;
            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                region.touches_border = true;
            }

            for (dx, dy) in NEIGHBOR_OFFSETS {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                let neighbor = (ny * w + nx) as usize;
                if !visited[neighbor] && (raw[neighbor] > 127) == is_foreground {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        visit(is_foreground, &region);
    }
}

/// Removes regions smaller than `min_size` pixels.
///
/// Foreground islands below the threshold are cleared to 0. Background holes
/// below the threshold are filled with 255, provided they do not touch the
/// image border (such regions belong to the surrounding background).
pub fn remove_small_regions(mask: &Mask, min_size: usize) -> Mask {
    let mut result = binarize(mask);
    if min_size == 0 {
        return result;
    }

    let mut updates = Vec::new();
    for_each_region(&result, |is_foreground, region| {
        if region.pixels.len() >= min_size {
            return;
        }
        if is_foreground {
            updates.push((BACKGROUND, region.pixels.clone()));
        } else if !region.touches_border {
            updates.push((FOREGROUND, region.pixels.clone()));
        }
    });

    apply_updates(&mut result, updates);
    result
}

/// Fills every background region that is completely enclosed by foreground.
pub fn fill_enclosed_holes(mask: &Mask) -> Mask {
    let mut result = binarize(mask);

    let mut updates = Vec::new();
    for_each_region(&result, |is_foreground, region| {
        if !is_foreground && !region.touches_border {
            updates.push((FOREGROUND, region.pixels.clone()));
        }
    });

    apply_updates(&mut result, updates);
    result
}

fn apply_updates(mask: &mut Mask, updates: Vec<(u8, Vec<usize>)>) {
    let raw: &mut [u8] = mask;
    for (value, pixels) in updates {
        for idx in pixels {
            raw[idx] = value;
        }
    }
}

/// Snaps every value to 0 or 255 around the 127 threshold.
pub fn binarize(mask: &Mask) -> Mask {
    imageproc::map::map_colors(mask, |Luma([value])| {
        Luma([if value > 127 { FOREGROUND } else { BACKGROUND }])
    })
}
