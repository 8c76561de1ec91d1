//! Soft alpha estimation from a hard mask.
//!
//! ## Overview
//!
//! The refined mask is first split into a [`Trimap`]. Definite pixels keep
//! alpha 255 or 0; only the unknown band is estimated.
//!
//! ### Closed-form estimate
//!
//! For an unknown pixel with color `I`, the local foreground color `F` and
//! background color `B` are the mean colors of definite foreground and
//! definite background pixels within the estimation radius. Alpha follows
//! from the relative distances of `I` to both:
//!
//! ```text
//! alpha = 1 - |I - F| / (|I - F| + |I - B|)
//! ```
//!
//! Missing samples fall back to black for `F` and white for `B`. When both
//! distances add up to less than 1 the colors coincide and alpha is 1.
//!
//! ### Edge-aware smoothing
//!
//! The unknown band is then smoothed by bilateral passes over the 3x3
//! neighborhood. Each neighbor is weighted by
//!
//! ```text
//! w = exp(-(dx^2 + dy^2) / (2 * sigma_s^2)) * exp(-|I_p - I_q|^2 / (2 * sigma_c^2))
//! ```
//!
//! so alpha is averaged along similar colors and not across image edges.
//! Definite pixels are fixed points of the smoothing.

use image::{Luma, Rgba};
use imageproc::definitions::Image;
use log::debug;

use crate::error::Error;
use crate::imageops_cutout::kmeans::Color;
use crate::imageops_cutout::trimap::{Trimap, TrimapLabel};
use crate::imageops_cutout::Mask;
use crate::utils::{
    color_distance_sq, fill_rows, rgb_f32, round_to_u8, validate_matching_dimensions, window,
};

const FOREGROUND_FALLBACK: Color = [0.0, 0.0, 0.0];
const BACKGROUND_FALLBACK: Color = [255.0, 255.0, 255.0];

/// Parameters of [`AlphaMatteEstimator`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatteConfig {
    /// Window radius used to build the trimap
    pub trimap_radius: u32,
    /// Mask values above this (across the whole window) are definite foreground
    pub foreground_threshold: u8,
    /// Mask values below this (across the whole window) are definite background
    pub background_threshold: u8,
    /// Radius searched for definite samples when estimating local colors
    pub estimation_radius: u32,
    pub smoothing_passes: usize,
    pub spatial_sigma: f32,
    /// Variance of the color-similarity Gaussian
    pub color_sigma_sq: f32,
}

impl Default for MatteConfig {
    fn default() -> Self {
        Self {
            trimap_radius: 2,
            foreground_threshold: 200,
            background_threshold: 50,
            estimation_radius: 5,
            smoothing_passes: 2,
            spatial_sigma: 1.0,
            color_sigma_sq: 1000.0,
        }
    }
}

impl MatteConfig {
    /// Checks that every parameter is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.background_threshold > self.foreground_threshold {
            return Err(Error::InvalidParameter(format!(
                "background_threshold ({}) must not exceed foreground_threshold ({})",
                self.background_threshold, self.foreground_threshold
            )));
        }
        if !(self.spatial_sigma > 0.0) || !(self.color_sigma_sq > 0.0) {
            return Err(Error::InvalidParameter(
                "spatial_sigma and color_sigma_sq must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Converts a hard mask into a continuous alpha matte.
#[derive(Debug, Clone, Default)]
pub struct AlphaMatteEstimator {
    config: MatteConfig,
}

impl AlphaMatteEstimator {
    /// Create an estimator after validating `config`.
    pub fn new(config: MatteConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &MatteConfig {
        &self.config
    }

    /// Builds the trimap of `mask` with the configured radius and thresholds.
    pub fn trimap(&self, mask: &Mask) -> Trimap {
        Trimap::from_mask(
            mask,
            self.config.trimap_radius,
            self.config.foreground_threshold,
            self.config.background_threshold,
        )
    }

    /// Estimates the alpha matte of `image` from the refined `mask`.
    pub fn estimate(&self, image: &Image<Rgba<u8>>, mask: &Mask) -> Result<Mask, Error> {
        validate_matching_dimensions(image.dimensions(), mask.dimensions())?;
        let trimap = self.trimap(mask);
        self.estimate_with_trimap(image, &trimap)
    }

    /// Estimates the alpha matte of `image` for an existing trimap.
    pub fn estimate_with_trimap(
        &self,
        image: &Image<Rgba<u8>>,
        trimap: &Trimap,
    ) -> Result<Mask, Error> {
        validate_matching_dimensions(image.dimensions(), trimap.dimensions())?;
        debug!(
            "alpha matting: {} unknown, {} foreground, {} background pixels",
            trimap.count(TrimapLabel::Unknown),
            trimap.count(TrimapLabel::Foreground),
            trimap.count(TrimapLabel::Background)
        );

        let mut alpha = self.closed_form_alpha(image, trimap);
        for _ in 0..self.config.smoothing_passes {
            alpha = self.bilateral_pass(image, trimap, &alpha);
        }

        let (width, height) = image.dimensions();
        let values = alpha.into_iter().map(|a| round_to_u8(a * 255.0)).collect();
        Mask::from_raw(width, height, values).ok_or(Error::ImageBufferCreationFailed)
    }

    /// Per-pixel alpha in `[0, 1]` before smoothing, row-major.
    pub fn closed_form_alpha(&self, image: &Image<Rgba<u8>>, trimap: &Trimap) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let radius = self.config.estimation_radius;

        let mut alpha = vec![0.0f32; width as usize * height as usize];
        fill_rows(&mut alpha, width as usize, |y, row| {
            let y = y as u32;
            for (x, value) in row.iter_mut().enumerate() {
                let x = x as u32;
                *value = match trimap.label(x, y) {
                    TrimapLabel::Foreground => 1.0,
                    TrimapLabel::Background => 0.0,
                    TrimapLabel::Unknown => {
                        let (foreground, background) =
                            local_colors(image, trimap, x, y, radius);
                        solve_alpha(rgb_f32(image.get_pixel(x, y)), foreground, background)
                    }
                };
            }
        });
        alpha
    }

    fn bilateral_pass(&self, image: &Image<Rgba<u8>>, trimap: &Trimap, alpha: &[f32]) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let spatial_denominator = 2.0 * self.config.spatial_sigma * self.config.spatial_sigma;
        let color_denominator = 2.0 * self.config.color_sigma_sq;

        let mut smoothed = alpha.to_vec();
        fill_rows(&mut smoothed, width as usize, |y, row| {
            let y = y as u32;
            for (x, value) in row.iter_mut().enumerate() {
                let x = x as u32;
                if trimap.label(x, y) != TrimapLabel::Unknown {
                    continue;
                }

                let center = rgb_f32(image.get_pixel(x, y));
                let mut weighted = 0.0;
                let mut total = 0.0;
                for (nx, ny) in window(x, y, 1, width, height) {
                    let dx = nx as f32 - x as f32;
                    let dy = ny as f32 - y as f32;
                    let neighbor = rgb_f32(image.get_pixel(nx, ny));
                    let weight = (-dx.mul_add(dx, dy * dy) / spatial_denominator).exp()
                        * (-color_distance_sq(center, neighbor) / color_denominator).exp();
                    weighted += weight * alpha[(ny * width + nx) as usize];
                    total += weight;
                }
                if total > 0.0 {
                    *value = (weighted / total).clamp(0.0, 1.0);
                }
            }
        });
        smoothed
    }
}

/// Mean colors of definite foreground and background pixels around `(x, y)`.
fn local_colors(
    image: &Image<Rgba<u8>>,
    trimap: &Trimap,
    x: u32,
    y: u32,
    radius: u32,
) -> (Color, Color) {
    let (width, height) = image.dimensions();
    let mut foreground = ([0.0f32; 3], 0u32);
    let mut background = ([0.0f32; 3], 0u32);

    for (nx, ny) in window(x, y, radius, width, height) {
        let accumulator = match trimap.label(nx, ny) {
            TrimapLabel::Foreground => &mut foreground,
            TrimapLabel::Background => &mut background,
            TrimapLabel::Unknown => continue,
        };
        let color = rgb_f32(image.get_pixel(nx, ny));
        for c in 0..3 {
            accumulator.0[c] += color[c];
        }
        accumulator.1 += 1;
    }

    let mean = |(sum, count): ([f32; 3], u32), fallback: Color| {
        if count == 0 {
            fallback
        } else {
            let inv = 1.0 / count as f32;
            [sum[0] * inv, sum[1] * inv, sum[2] * inv]
        }
    };
    (
        mean(foreground, FOREGROUND_FALLBACK),
        mean(background, BACKGROUND_FALLBACK),
    )
}

/// Solves the compositing equation by relative color distance.
///
/// Always returns a value in `[0, 1]`.
#[inline]
pub fn solve_alpha(color: Color, foreground: Color, background: Color) -> f32 {
    let to_foreground = color_distance_sq(color, foreground).sqrt();
    let to_background = color_distance_sq(color, background).sqrt();
    let total = to_foreground + to_background;
    if total < 1.0 {
        return 1.0;
    }
    (1.0 - to_foreground / total).clamp(0.0, 1.0)
}

/// Estimates the alpha matte with the default configuration.
pub fn estimate_alpha(image: &Image<Rgba<u8>>, mask: &Mask) -> Result<Mask, Error> {
    AlphaMatteEstimator::default().estimate(image, mask)
}
