//! Test utilities for imageops-cutout
//!
//! This module provides common fixtures for testing the cutout stages.
//! It is only compiled when running tests.

use image::{Luma, Rgba};
use imageproc::definitions::Image;

use crate::imageops_cutout::Mask;

pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Creates an RGBA image filled with a single color.
pub fn create_uniform_image(width: u32, height: u32, color: Rgba<u8>) -> Image<Rgba<u8>> {
    Image::from_pixel(width, height, color)
}

/// Creates the canonical subject fixture: a `size`x`size` red square
/// centred on a white canvas.
///
/// # Arguments
/// * `width` - Width of the canvas
/// * `height` - Height of the canvas
/// * `size` - Side length of the red square
pub fn create_centered_square_image(width: u32, height: u32, size: u32) -> Image<Rgba<u8>> {
    let mut image = create_uniform_image(width, height, WHITE);
    let x0 = (width - size) / 2;
    let y0 = (height - size) / 2;
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            image.put_pixel(x, y, RED);
        }
    }
    image
}

/// Sets a rectangle of `mask` to `value`.
pub fn fill_rect(mask: &mut Mask, x: u32, y: u32, w: u32, h: u32, value: u8) {
    for yy in y..y + h {
        for xx in x..x + w {
            mask.put_pixel(xx, yy, Luma([value]));
        }
    }
}

/// Counts the mask pixels equal to `value`.
pub fn mask_count(mask: &Mask, value: u8) -> usize {
    mask.as_raw().iter().filter(|&&v| v == value).count()
}

/// Mask matching [`create_centered_square_image`]: 255 inside the square.
pub fn create_centered_square_mask(width: u32, height: u32, size: u32) -> Mask {
    let mut mask = Mask::new(width, height);
    fill_rect(&mut mask, (width - size) / 2, (height - size) / 2, size, size, 255);
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_centered_square_image_places_square_in_the_middle() {
        let image = create_centered_square_image(100, 100, 40);
        assert_eq!(image.dimensions(), (100, 100));
        assert_eq!(image.get_pixel(30, 30), &RED);
        assert_eq!(image.get_pixel(69, 69), &RED);
        assert_eq!(image.get_pixel(29, 50), &WHITE);
        assert_eq!(image.get_pixel(70, 50), &WHITE);
    }

    #[test]
    fn create_centered_square_mask_matches_image() {
        let mask = create_centered_square_mask(100, 100, 40);
        assert_eq!(mask_count(&mask, 255), 1600);
        assert_eq!(mask.get_pixel(30, 30)[0], 255);
        assert_eq!(mask.get_pixel(29, 30)[0], 0);
    }
}
