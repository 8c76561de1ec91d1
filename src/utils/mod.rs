//! Internal utility functions for imageops-cutout.
//!
//! This module contains common functionality used across the cutout stages.

use image::{Primitive, Rgba};
use imageproc::definitions::Clamp;
use itertools::iproduct;

use crate::error::Error;

/// Clamps a floating-point value to the range of a primitive type.
///
/// # Arguments
///
/// * `value` - The floating-point value to clamp
///
/// # Returns
///
/// The clamped value as the target primitive type
#[inline]
pub fn clamp_f32_to_primitive<T: Primitive + Clamp<f32>>(value: f32) -> T {
    T::clamp(value)
}

/// Rounds a floating-point channel value and clamps it into `u8`.
#[inline]
pub fn round_to_u8(value: f32) -> u8 {
    clamp_f32_to_primitive::<u8>(value.round())
}

/// Returns the color channels of an RGBA pixel as floats, dropping alpha.
#[inline]
pub fn rgb_f32(pixel: &Rgba<u8>) -> [f32; 3] {
    let Rgba([red, green, blue, _]) = *pixel;
    [f32::from(red), f32::from(green), f32::from(blue)]
}

/// Squared Euclidean distance between two colors in RGB space.
#[inline]
pub fn color_distance_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    db.mul_add(db, dr.mul_add(dr, dg * dg))
}

/// Iterates over the in-bounds coordinates of the square window of `radius`
/// centred on `(x, y)`, the centre included.
#[inline]
pub fn window(
    x: u32,
    y: u32,
    radius: u32,
    width: u32,
    height: u32,
) -> impl Iterator<Item = (u32, u32)> {
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = x.saturating_add(radius).min(width.saturating_sub(1));
    let y1 = y.saturating_add(radius).min(height.saturating_sub(1));
    iproduct!(y0..=y1, x0..=x1).map(|(ny, nx)| (nx, ny))
}

/// Fills `buffer` row by row, `row_fn` receiving the row index and the row slice.
///
/// Rows are disjoint, so with the `rayon` feature they are filled in parallel.
/// `row_fn` must only read state that no row writes to.
pub fn fill_rows<T, F>(buffer: &mut [T], width: usize, row_fn: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    if width == 0 {
        return;
    }

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        buffer
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| row_fn(y, row));
    }

    #[cfg(not(feature = "rayon"))]
    buffer
        .chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| row_fn(y, row));
}

/// Validates that an image has non-zero dimensions.
///
/// # Arguments
///
/// * `width` - The width of the image
/// * `height` - The height of the image
/// * `buffer_len` - Length of the raw buffer, reported in the error
pub const fn validate_non_empty_image(
    width: u32,
    height: u32,
    buffer_len: usize,
) -> Result<(), Error> {
    if width == 0 || height == 0 {
        Err(Error::InvalidDimensions {
            width,
            height,
            buffer_len,
        })
    } else {
        Ok(())
    }
}

/// Validates that two grids have matching dimensions.
///
/// # Arguments
///
/// * `expected` - Dimensions of the reference image
/// * `actual` - Dimensions of the mask or grid being checked
pub const fn validate_matching_dimensions(
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), Error> {
    if expected.0 != actual.0 || expected.1 != actual.1 {
        Err(Error::DimensionMismatch { expected, actual })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_f32_to_primitive() {
        assert_eq!(clamp_f32_to_primitive::<u8>(-10.0), 0);
        assert_eq!(clamp_f32_to_primitive::<u8>(0.0), 0);
        assert_eq!(clamp_f32_to_primitive::<u8>(127.5), 127);
        assert_eq!(clamp_f32_to_primitive::<u8>(255.0), 255);
        assert_eq!(clamp_f32_to_primitive::<u8>(300.0), 255);
    }

    #[test]
    fn test_round_to_u8() {
        assert_eq!(round_to_u8(127.5), 128);
        assert_eq!(round_to_u8(-3.0), 0);
        assert_eq!(round_to_u8(254.6), 255);
    }

    #[test]
    fn test_color_distance_sq() {
        assert_eq!(color_distance_sq([0.0; 3], [0.0; 3]), 0.0);
        assert_eq!(color_distance_sq([255.0, 0.0, 0.0], [255.0, 255.0, 255.0]), 130_050.0);
        assert_eq!(color_distance_sq([1.0, 2.0, 3.0], [4.0, 6.0, 3.0]), 25.0);
    }

    #[test]
    fn test_window_clips_to_image() {
        let corner: Vec<_> = window(0, 0, 1, 4, 4).collect();
        assert_eq!(corner, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);

        assert_eq!(window(2, 2, 1, 5, 5).count(), 9);
        assert_eq!(window(2, 2, 2, 5, 5).count(), 25);
        assert_eq!(window(0, 0, 3, 1, 1).count(), 1);
    }

    #[test]
    fn test_fill_rows_visits_every_row() {
        let mut buffer = vec![0usize; 12];
        fill_rows(&mut buffer, 4, |y, row| {
            for (x, value) in row.iter_mut().enumerate() {
                *value = y * 10 + x;
            }
        });
        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[5], 11);
        assert_eq!(buffer[11], 23);
    }

    #[test]
    fn test_validate_non_empty_image() {
        assert!(validate_non_empty_image(100, 100, 40_000).is_ok());
        assert!(validate_non_empty_image(1, 1, 4).is_ok());
        assert!(validate_non_empty_image(0, 100, 0).is_err());
        assert!(validate_non_empty_image(100, 0, 0).is_err());
    }

    #[test]
    fn test_validate_matching_dimensions() {
        assert!(validate_matching_dimensions((100, 100), (100, 100)).is_ok());
        assert_eq!(
            validate_matching_dimensions((100, 100), (100, 50)),
            Err(Error::DimensionMismatch {
                expected: (100, 100),
                actual: (100, 50),
            })
        );
    }
}
