//! Iterative foreground/background reclassification from color models.
//!
//! Each pass partitions the pixels by the current mask, fits a small Gaussian
//! mixture-like [`ColorModel`] to either class with k-means, and reassigns
//! every interior pixel by comparing
//!
//! ```text
//! P(fg) = 0.7 * color_fg + 0.3 * smoothness
//! P(bg) = 0.7 * color_bg + 0.3 * (1 - smoothness)
//! ```
//!
//! where `smoothness` is the fraction of the 8 neighbors currently in the
//! foreground. The previous mask is read as an immutable snapshot while the
//! next one is written, and the one-pixel image border is never changed.

use image::{Luma, Rgba};
use imageproc::definitions::Image;
use log::debug;
use rand::Rng;

use crate::error::Error;
use crate::imageops_cutout::kmeans::{kmeans, nearest_centroid, Color};
use crate::imageops_cutout::Mask;
use crate::utils::{color_distance_sq, fill_rows, rgb_f32, validate_matching_dimensions};

/// Probability assigned by an empty model to every color.
pub const NEUTRAL_PROBABILITY: f32 = 0.5;

/// Parameters of [`ColorRefiner`].
#[derive(Debug, Clone, PartialEq)]
pub struct RefinerConfig {
    pub iterations: usize,
    /// Maximum number of components per color model
    pub components: usize,
    pub kmeans_iterations: usize,
    /// Lower bound applied to every component variance
    pub variance_floor: f32,
    pub color_weight: f32,
    pub spatial_weight: f32,
    /// Mask values above this are treated as foreground
    pub mask_threshold: u8,
    /// Colors per class used to fit a model; larger classes are subsampled evenly
    pub max_model_samples: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            components: 3,
            kmeans_iterations: 10,
            variance_floor: 100.0,
            color_weight: 0.7,
            spatial_weight: 0.3,
            mask_threshold: 127,
            max_model_samples: 20_000,
        }
    }
}

impl RefinerConfig {
    /// Checks that every parameter is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.components == 0 {
            return Err(Error::InvalidParameter(
                "components must be greater than 0".to_string(),
            ));
        }
        if self.max_model_samples == 0 {
            return Err(Error::InvalidParameter(
                "max_model_samples must be greater than 0".to_string(),
            ));
        }
        if !(self.variance_floor > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "variance_floor must be positive, got {}",
                self.variance_floor
            )));
        }
        if self.color_weight < 0.0 || self.spatial_weight < 0.0 {
            return Err(Error::InvalidParameter(
                "color_weight and spatial_weight must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One component of a [`ColorModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorComponent {
    pub mean: Color,
    /// Mean squared distance of the members from `mean`, floored
    pub variance: f32,
}

/// Color distribution of one pixel class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorModel {
    components: Vec<ColorComponent>,
}

impl ColorModel {
    /// Fits up to `components` clusters to `colors`.
    ///
    /// Components that attract no member keep the floor variance.
    pub fn fit<R>(
        colors: &[Color],
        components: usize,
        iterations: usize,
        variance_floor: f32,
        rng: &mut R,
    ) -> Self
    where
        R: Rng + ?Sized,
    {
        let centroids = kmeans(colors, components, iterations, rng);
        if centroids.is_empty() {
            return Self::default();
        }

        let mut sums = vec![0.0f64; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for &color in colors {
            let nearest = nearest_centroid(color, &centroids);
            sums[nearest] += f64::from(color_distance_sq(color, centroids[nearest]));
            counts[nearest] += 1;
        }

        let components = centroids
            .iter()
            .zip(sums.iter().zip(&counts))
            .map(|(&mean, (&sum, &count))| {
                let variance = if count > 0 {
                    (sum / count as f64) as f32
                } else {
                    0.0
                };
                ColorComponent {
                    mean,
                    variance: variance.max(variance_floor),
                }
            })
            .collect();

        Self { components }
    }

    pub fn components(&self) -> &[ColorComponent] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Gaussian-kernel likelihood of `color`, the maximum over components of
    /// `exp(-d^2 / (2 * variance))`. An empty model is neutral (0.5).
    #[inline]
    pub fn probability(&self, color: Color) -> f32 {
        if self.components.is_empty() {
            return NEUTRAL_PROBABILITY;
        }
        self.components
            .iter()
            .map(|c| (-color_distance_sq(color, c.mean) / (2.0 * c.variance)).exp())
            .fold(0.0, f32::max)
    }
}

/// Refines a binary mask with per-class color models and neighborhood agreement.
#[derive(Debug, Clone, Default)]
pub struct ColorRefiner {
    config: RefinerConfig,
}

impl ColorRefiner {
    /// Create a refiner after validating `config`.
    pub fn new(config: RefinerConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &RefinerConfig {
        &self.config
    }

    /// Builds the foreground and background models for `mask`.
    pub fn fit_models<R>(
        &self,
        image: &Image<Rgba<u8>>,
        mask: &Mask,
        rng: &mut R,
    ) -> Result<(ColorModel, ColorModel), Error>
    where
        R: Rng + ?Sized,
    {
        validate_matching_dimensions(image.dimensions(), mask.dimensions())?;

        let threshold = self.config.mask_threshold;
        let mut foreground = Vec::new();
        let mut background = Vec::new();
        for (pixel, Luma([value])) in image.pixels().zip(mask.pixels()) {
            if *value > threshold {
                foreground.push(rgb_f32(pixel));
            } else {
                background.push(rgb_f32(pixel));
            }
        }

        let config = &self.config;
        let mut fit = |colors: Vec<Color>, class: &str| {
            if colors.is_empty() {
                debug!("color refinement: empty {class} class, using neutral model");
            }
            let samples = subsample(colors, config.max_model_samples);
            ColorModel::fit(
                &samples,
                config.components,
                config.kmeans_iterations,
                config.variance_floor,
                &mut *rng,
            )
        };
        let foreground_model = fit(foreground, "foreground");
        let background_model = fit(background, "background");
        Ok((foreground_model, background_model))
    }

    /// Runs one fit-and-reclassify pass.
    pub fn refine_once<R>(
        &self,
        image: &Image<Rgba<u8>>,
        mask: &Mask,
        rng: &mut R,
    ) -> Result<Mask, Error>
    where
        R: Rng + ?Sized,
    {
        let (foreground_model, background_model) = self.fit_models(image, mask, rng)?;
        Ok(self.reclassify(image, mask, &foreground_model, &background_model))
    }

    /// Runs the configured number of passes and returns the refined mask
    /// (values 0 or 255 inside, border copied from `mask`).
    pub fn refine<R>(&self, image: &Image<Rgba<u8>>, mask: &Mask, rng: &mut R) -> Result<Mask, Error>
    where
        R: Rng + ?Sized,
    {
        validate_matching_dimensions(image.dimensions(), mask.dimensions())?;

        let mut current = mask.clone();
        for iteration in 0..self.config.iterations {
            let next = self.refine_once(image, &current, rng)?;
            let changed = next
                .as_raw()
                .iter()
                .zip(current.as_raw())
                .filter(|(a, b)| a != b)
                .count();
            debug!("color refinement pass {iteration}: {changed} pixels changed");
            current = next;
        }
        Ok(current)
    }

    fn reclassify(
        &self,
        image: &Image<Rgba<u8>>,
        mask: &Mask,
        foreground_model: &ColorModel,
        background_model: &ColorModel,
    ) -> Mask {
        let (width, height) = mask.dimensions();
        let threshold = self.config.mask_threshold;
        let color_weight = self.config.color_weight;
        let spatial_weight = self.config.spatial_weight;
        let is_foreground = |x: u32, y: u32| mask.get_pixel(x, y)[0] > threshold;

        let mut values = mask.as_raw().clone();
        fill_rows(&mut values, width as usize, |y, row| {
            let y = y as u32;
            if y == 0 || y + 1 >= height {
                return;
            }
            for x in 1..width.saturating_sub(1) {
                let mut neighbors = 0u32;
                for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        if (nx, ny) != (x, y) && is_foreground(nx, ny) {
                            neighbors += 1;
                        }
                    }
                }
                let smoothness = neighbors as f32 / 8.0;

                let color = rgb_f32(image.get_pixel(x, y));
                let fg = color_weight * foreground_model.probability(color)
                    + spatial_weight * smoothness;
                let bg = color_weight * background_model.probability(color)
                    + spatial_weight * (1.0 - smoothness);
                row[x as usize] = if fg > bg { 255 } else { 0 };
            }
        });

        Image::from_raw(width, height, values).unwrap_or_else(|| mask.clone())
    }
}

/// Keeps at most `limit` colors, taken at an even stride.
fn subsample(colors: Vec<Color>, limit: usize) -> Vec<Color> {
    if colors.len() <= limit {
        return colors;
    }
    let stride = colors.len().div_ceil(limit);
    colors.into_iter().step_by(stride).collect()
}

/// Refines `mask` with the default configuration.
pub fn refine_mask<R>(image: &Image<Rgba<u8>>, mask: &Mask, rng: &mut R) -> Result<Mask, Error>
where
    R: Rng + ?Sized,
{
    ColorRefiner::default().refine(image, mask, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        create_centered_square_image, create_centered_square_mask, create_uniform_image,
        fill_rect, mask_count,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn color_model_variance_is_floored() {
        let colors = vec![[10.0, 20.0, 30.0]; 50];
        let model = ColorModel::fit(&colors, 3, 10, 100.0, &mut StdRng::seed_from_u64(1));

        assert_eq!(model.components().len(), 3);
        assert!(model.components().iter().all(|c| c.variance == 100.0));
        assert_eq!(model.probability([10.0, 20.0, 30.0]), 1.0);
    }

    #[test]
    fn color_model_probability_follows_gaussian_kernel() {
        let model = ColorModel {
            components: vec![ColorComponent {
                mean: [0.0, 0.0, 0.0],
                variance: 100.0,
            }],
        };
        let expected = (-100.0f32 / 200.0).exp();
        assert!((model.probability([10.0, 0.0, 0.0]) - expected).abs() < 1e-6);
        assert!(model.probability([255.0, 255.0, 255.0]) < 1e-6);
    }

    #[test]
    fn empty_color_model_is_neutral() {
        let model = ColorModel::fit(&[], 3, 10, 100.0, &mut StdRng::seed_from_u64(1));
        assert!(model.is_empty());
        assert_eq!(model.probability([1.0, 2.0, 3.0]), NEUTRAL_PROBABILITY);
    }

    #[test]
    fn refine_keeps_correct_mask_stable() {
        let image = create_centered_square_image(60, 60, 24);
        let mask = create_centered_square_mask(60, 60, 24);

        let refined = refine_mask(&image, &mask, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(refined, mask);
    }

    #[test]
    fn refine_removes_stray_background_patch() {
        let image = create_centered_square_image(60, 60, 24);
        let mut mask = create_centered_square_mask(60, 60, 24);
        fill_rect(&mut mask, 5, 5, 2, 2, 255);

        let refined = refine_mask(&image, &mask, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(refined, create_centered_square_mask(60, 60, 24));
    }

    #[test]
    fn refine_never_touches_border() {
        let image = create_uniform_image(20, 20, Rgba([90, 90, 90, 255]));
        let mut mask = Mask::new(20, 20);
        fill_rect(&mut mask, 0, 0, 20, 1, 255);
        fill_rect(&mut mask, 0, 0, 1, 20, 255);

        let refined = refine_mask(&image, &mask, &mut StdRng::seed_from_u64(4)).unwrap();
        for i in 0..20 {
            assert_eq!(refined.get_pixel(i, 0)[0], 255);
            assert_eq!(refined.get_pixel(0, i)[0], 255);
        }
        for i in 1..20 {
            assert_eq!(refined.get_pixel(19, i)[0], 0);
            assert_eq!(refined.get_pixel(i, 19)[0], 0);
        }
    }

    #[test]
    fn refine_with_empty_foreground_stays_empty() {
        let image = create_uniform_image(30, 30, Rgba([200, 100, 50, 255]));
        let mask = Mask::new(30, 30);

        let refined = refine_mask(&image, &mask, &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(mask_count(&refined, 0), 900);
    }

    #[test]
    fn refine_rejects_mismatched_mask() {
        let image = create_uniform_image(10, 10, Rgba([0, 0, 0, 255]));
        let mask = Mask::new(10, 9);
        let result = refine_mask(&image, &mask, &mut StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn subsample_limits_sample_count() {
        let colors = vec![[0.0; 3]; 1000];
        assert_eq!(subsample(colors.clone(), 2000).len(), 1000);
        assert!(subsample(colors, 300).len() <= 300);
    }
}
