//! Automatic subject detection without manual input.
//!
//! The detector fuses four per-pixel cues into a single foreground score:
//!
//! ```text
//! score = 0.35 * saliency + 0.25 * edge + 0.25 * not_background_cluster + 0.15 * center_bias
//! ```
//!
//! - **saliency**: mean absolute color difference against a sparse grid of
//!   samples around the pixel, normalized by the image maximum
//! - **edge**: Sobel gradient magnitude of the luma channel, clamped to `[0, 1]`
//! - **not_background_cluster**: 1 unless the pixel's k-means color cluster is
//!   the one occupying most of the image border
//! - **center_bias**: 1 at the image center falling linearly to 0 at the corners
//!
//! Scores above the threshold become foreground (255), and the binary mask is
//! cleaned with a morphological close, an open, enclosed-hole filling and
//! small-region removal.

use image::{Luma, Rgba};
use imageproc::definitions::Image;
use log::debug;
use rand::Rng;

use crate::error::Error;
use crate::imageops_cutout::kmeans::{kmeans, nearest_centroid, Color};
use crate::imageops_cutout::mask_cleanup::{
    close_mask, fill_enclosed_holes, open_mask, remove_small_regions,
};
use crate::imageops_cutout::Mask;
use crate::utils::{fill_rows, rgb_f32, validate_non_empty_image};

/// Relative weights of the detection cues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub saliency: f32,
    pub edge: f32,
    pub foreground_cluster: f32,
    pub center_bias: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            saliency: 0.35,
            edge: 0.25,
            foreground_cluster: 0.25,
            center_bias: 0.15,
        }
    }
}

/// Parameters of [`SubjectDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectDetectorConfig {
    /// Half extent of the saliency sampling grid
    pub saliency_radius: u32,
    /// Spacing between saliency samples
    pub saliency_stride: u32,
    /// Number of k-means color clusters
    pub cluster_count: usize,
    /// Every n-th pixel is fed to k-means
    pub cluster_sample_stride: usize,
    pub cluster_iterations: usize,
    pub weights: FusionWeights,
    /// Fused scores above this value are foreground
    pub threshold: f32,
    pub close_radius: u8,
    pub open_radius: u8,
    /// Regions with fewer pixels are removed during cleanup
    pub min_region_size: usize,
    pub fill_enclosed_holes: bool,
}

impl Default for SubjectDetectorConfig {
    fn default() -> Self {
        Self {
            saliency_radius: 15,
            saliency_stride: 5,
            cluster_count: 5,
            cluster_sample_stride: 4,
            cluster_iterations: 10,
            weights: FusionWeights::default(),
            threshold: 0.45,
            close_radius: 3,
            open_radius: 2,
            min_region_size: 100,
            fill_enclosed_holes: true,
        }
    }
}

impl SubjectDetectorConfig {
    /// Checks that every parameter is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.saliency_stride == 0 {
            return Err(Error::InvalidParameter(
                "saliency_stride must be greater than 0".to_string(),
            ));
        }
        if self.cluster_count == 0 || self.cluster_count > usize::from(u8::MAX) {
            return Err(Error::InvalidParameter(format!(
                "cluster_count must be in 1..=255, got {}",
                self.cluster_count
            )));
        }
        if self.cluster_sample_stride == 0 {
            return Err(Error::InvalidParameter(
                "cluster_sample_stride must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidParameter(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        let FusionWeights {
            saliency,
            edge,
            foreground_cluster,
            center_bias,
        } = self.weights;
        if [saliency, edge, foreground_cluster, center_bias]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(Error::InvalidParameter(
                "fusion weights must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-pixel k-means cluster indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterGrid {
    width: u32,
    height: u32,
    labels: Vec<u8>,
    centroids: Vec<Color>,
}

impl ClusterGrid {
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Cluster index of the pixel at `(x, y)`.
    #[inline]
    pub fn label(&self, x: u32, y: u32) -> u8 {
        self.labels[(y * self.width + x) as usize]
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn centroids(&self) -> &[Color] {
        &self.centroids
    }

    /// The cluster that occupies most border pixels. Ties resolve to the
    /// lowest cluster index.
    pub fn background_cluster(&self) -> u8 {
        let mut tally = vec![0usize; self.centroids.len().max(1)];
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    tally[usize::from(self.label(x, y))] += 1;
                }
            }
        }

        let mut best = 0;
        for (index, &count) in tally.iter().enumerate() {
            if count > tally[best] {
                best = index;
            }
        }
        best as u8
    }
}

/// Computes the normalized saliency map.
///
/// Every pixel is compared against the samples at offsets
/// `{-radius, -radius + stride, ..} x {-radius, ..}` that fall inside the image.
/// The mean absolute channel difference is divided by the image maximum, so
/// the result lies in `[0, 1]` and is all zero for a uniform image.
pub fn saliency_map(
    image: &Image<Rgba<u8>>,
    radius: u32,
    stride: u32,
) -> Result<Image<Luma<f32>>, Error> {
    let (width, height) = image.dimensions();
    let offsets = sample_offsets(radius, stride);
    let (w, h) = (i64::from(width), i64::from(height));

    let mut values = vec![0.0f32; width as usize * height as usize];
    fill_rows(&mut values, width as usize, |y, row| {
        let y = y as i64;
        for (x, value) in row.iter_mut().enumerate() {
            let x = x as i64;
            let center = rgb_f32(image.get_pixel(x as u32, y as u32));
            let mut sum = 0.0;
            let mut count = 0u32;
            for &(dx, dy) in &offsets {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                let sample = rgb_f32(image.get_pixel(nx as u32, ny as u32));
                sum += ((center[0] - sample[0]).abs()
                    + (center[1] - sample[1]).abs()
                    + (center[2] - sample[2]).abs())
                    / 3.0;
                count += 1;
            }
            *value = if count > 0 { sum / count as f32 } else { 0.0 };
        }
    });

    let max = values.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        let inv_max = 1.0 / max;
        values.iter_mut().for_each(|v| *v *= inv_max);
    }

    Image::from_raw(width, height, values).ok_or(Error::ImageBufferCreationFailed)
}

fn sample_offsets(radius: u32, stride: u32) -> Vec<(i64, i64)> {
    let radius = i64::from(radius);
    let stride = stride.max(1) as usize;
    let steps: Vec<i64> = (-radius..=radius).step_by(stride).collect();
    steps
        .iter()
        .flat_map(|&dy| steps.iter().map(move |&dx| (dx, dy)))
        .filter(|&offset| offset != (0, 0))
        .collect()
}

/// Sobel edge strength of the luma channel, `magnitude / 255` clamped to 1.
pub fn edge_map(image: &Image<Rgba<u8>>) -> Image<Luma<f32>> {
    let gray = image::imageops::grayscale(image);
    let gradients = imageproc::gradients::sobel_gradients(&gray);
    imageproc::map::map_colors(&gradients, |Luma([magnitude])| {
        Luma([(f32::from(magnitude) / 255.0).min(1.0)])
    })
}

/// Clusters the image colors with k-means and labels every pixel with its
/// nearest centroid.
///
/// Only every `sample_stride`-th pixel (in row-major order) trains the
/// centroids; all pixels are labelled.
pub fn cluster_colors<R>(
    image: &Image<Rgba<u8>>,
    cluster_count: usize,
    sample_stride: usize,
    iterations: usize,
    rng: &mut R,
) -> ClusterGrid
where
    R: Rng + ?Sized,
{
    let (width, height) = image.dimensions();
    let samples: Vec<Color> = image
        .pixels()
        .step_by(sample_stride.max(1))
        .map(rgb_f32)
        .collect();
    let centroids = kmeans(&samples, cluster_count, iterations, rng);

    let labels = image
        .pixels()
        .map(|pixel| nearest_centroid(rgb_f32(pixel), &centroids) as u8)
        .collect();

    ClusterGrid {
        width,
        height,
        labels,
        centroids,
    }
}

/// Detects the photographic subject and returns a clean binary mask.
///
/// # Examples
///
/// ```no_run
/// use imageops_cutout::{Image, SubjectDetector, SubjectDetectorConfig};
/// use image::Rgba;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let image: Image<Rgba<u8>> = Image::new(320, 240);
/// let detector = SubjectDetector::new(SubjectDetectorConfig::default())?;
/// let mask = detector.detect(&image, &mut StdRng::seed_from_u64(7))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SubjectDetector {
    config: SubjectDetectorConfig,
}

impl SubjectDetector {
    /// Create a detector after validating `config`.
    pub fn new(config: SubjectDetectorConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &SubjectDetectorConfig {
        &self.config
    }

    /// Fused foreground score of every pixel, before thresholding.
    pub fn score_map<R>(&self, image: &Image<Rgba<u8>>, rng: &mut R) -> Result<Image<Luma<f32>>, Error>
    where
        R: Rng + ?Sized,
    {
        let (width, height) = image.dimensions();
        validate_non_empty_image(width, height, image.as_raw().len())?;

        let config = &self.config;
        let saliency = saliency_map(image, config.saliency_radius, config.saliency_stride)?;
        let edges = edge_map(image);
        let clusters = cluster_colors(
            image,
            config.cluster_count,
            config.cluster_sample_stride,
            config.cluster_iterations,
            rng,
        );
        let background = clusters.background_cluster();
        debug!(
            "subject detection: {} clusters, background cluster {background}",
            clusters.centroids().len()
        );

        let weights = config.weights;
        let center_x = (width - 1) as f32 / 2.0;
        let center_y = (height - 1) as f32 / 2.0;
        let max_distance = center_x.hypot(center_y);

        Ok(Image::from_fn(width, height, |x, y| {
            let center_bias = if max_distance > 0.0 {
                1.0 - (x as f32 - center_x).hypot(y as f32 - center_y) / max_distance
            } else {
                1.0
            };
            let not_background = if clusters.label(x, y) == background {
                0.0
            } else {
                1.0
            };
            let score = weights.saliency * saliency.get_pixel(x, y)[0]
                + weights.edge * edges.get_pixel(x, y)[0]
                + weights.foreground_cluster * not_background
                + weights.center_bias * center_bias;
            Luma([score])
        }))
    }

    /// Thresholds the fused score and cleans the result.
    ///
    /// The returned mask holds only the values 0 and 255.
    pub fn detect<R>(&self, image: &Image<Rgba<u8>>, rng: &mut R) -> Result<Mask, Error>
    where
        R: Rng + ?Sized,
    {
        let scores = self.score_map(image, rng)?;
        let threshold = self.config.threshold;
        let raw = imageproc::map::map_colors(&scores, |Luma([score])| {
            Luma([if score > threshold { 255u8 } else { 0 }])
        });

        let mask = clean_mask(&raw, &self.config);
        debug!(
            "subject detection: {} of {} pixels foreground",
            mask.as_raw().iter().filter(|&&v| v == 255).count(),
            mask.as_raw().len()
        );
        Ok(mask)
    }
}

/// Runs the cleanup sequence on a binary mask: close, open, optional
/// enclosed-hole filling, then removal of regions below `min_region_size`.
pub fn clean_mask(mask: &Mask, config: &SubjectDetectorConfig) -> Mask {
    let closed = close_mask(mask, config.close_radius);
    let opened = open_mask(&closed, config.open_radius);
    let filled = if config.fill_enclosed_holes {
        fill_enclosed_holes(&opened)
    } else {
        opened
    };
    remove_small_regions(&filled, config.min_region_size)
}

/// Detects the subject with the default configuration.
pub fn detect_subject<R>(image: &Image<Rgba<u8>>, rng: &mut R) -> Result<Mask, Error>
where
    R: Rng + ?Sized,
{
    SubjectDetector::default().detect(image, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        create_centered_square_image, create_uniform_image, fill_rect, mask_count, RED, WHITE,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sample_offsets_cover_sparse_grid_without_center() {
        let offsets = sample_offsets(15, 5);
        assert_eq!(offsets.len(), 48);
        assert!(!offsets.contains(&(0, 0)));
        assert!(offsets.contains(&(-15, 15)));
        assert!(offsets.contains(&(5, 0)));
    }

    #[test]
    fn saliency_map_of_uniform_image_is_zero() {
        let image = create_uniform_image(20, 20, Rgba([30, 60, 90, 255]));
        let saliency = saliency_map(&image, 15, 5).unwrap();
        assert!(saliency.as_raw().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn saliency_map_is_normalized_and_peaks_near_square_edge() {
        let image = create_centered_square_image(100, 100, 40);
        let saliency = saliency_map(&image, 15, 5).unwrap();

        let max = saliency.as_raw().iter().copied().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
        assert!(saliency.as_raw().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(saliency.get_pixel(50, 50)[0], 0.0);
        assert_eq!(saliency.get_pixel(2, 2)[0], 0.0);
        assert!(saliency.get_pixel(31, 50)[0] > 0.5);
    }

    #[test]
    fn edge_map_marks_only_color_boundaries() {
        let image = create_centered_square_image(40, 40, 20);
        let edges = edge_map(&image);
        assert_eq!(edges.get_pixel(20, 20)[0], 0.0);
        assert_eq!(edges.get_pixel(2, 2)[0], 0.0);
        assert_eq!(edges.get_pixel(10, 20)[0], 1.0);
        assert_eq!(edges.get_pixel(9, 20)[0], 1.0);
    }

    #[test]
    fn background_cluster_is_border_majority() {
        let image = create_centered_square_image(50, 50, 20);
        let clusters = cluster_colors(&image, 5, 4, 10, &mut StdRng::seed_from_u64(3));
        let background = clusters.background_cluster();

        assert_eq!(clusters.label(0, 0), background);
        assert_ne!(clusters.label(25, 25), background);
    }

    #[test]
    fn background_cluster_tie_picks_lowest_index() {
        let grid = ClusterGrid {
            width: 2,
            height: 2,
            labels: vec![3, 1, 1, 3],
            centroids: vec![[0.0; 3]; 4],
        };
        assert_eq!(grid.background_cluster(), 1);
    }

    #[test]
    fn detect_produces_binary_mask_covering_square() {
        let image = create_centered_square_image(100, 100, 40);
        let mask = detect_subject(&image, &mut StdRng::seed_from_u64(11)).unwrap();

        assert!(mask.as_raw().iter().all(|&v| v == 0 || v == 255));
        assert_eq!(mask.get_pixel(50, 50)[0], 255);
        assert_eq!(mask.get_pixel(35, 60)[0], 255);
        assert_eq!(mask.get_pixel(5, 5)[0], 0);
        assert_eq!(mask.get_pixel(90, 50)[0], 0);
    }

    #[test]
    fn detect_is_deterministic_for_fixed_seed() {
        let mut image = create_centered_square_image(64, 48, 20);
        image.put_pixel(3, 4, RED);
        image.put_pixel(40, 30, WHITE);

        let first = detect_subject(&image, &mut StdRng::seed_from_u64(99)).unwrap();
        let second = detect_subject(&image, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn detect_on_uniform_image_is_empty() {
        let image = create_uniform_image(60, 40, Rgba([120, 130, 140, 255]));
        let detector = SubjectDetector::default();
        let mut rng = StdRng::seed_from_u64(5);

        let scores = detector.score_map(&image, &mut rng).unwrap();
        assert!(scores.as_raw().iter().all(|&s| s < 0.45));

        let mask = detector.detect(&image, &mut rng).unwrap();
        assert_eq!(mask_count(&mask, 0), 60 * 40);
    }

    #[test]
    fn clean_mask_removes_small_blob_and_keeps_large_blob() {
        let mut mask = Mask::new(80, 60);
        fill_rect(&mut mask, 5, 5, 10, 5, 255);
        fill_rect(&mut mask, 40, 30, 15, 10, 255);

        let cleaned = clean_mask(&mask, &SubjectDetectorConfig::default());
        assert_eq!(cleaned.get_pixel(7, 7)[0], 0);
        assert_eq!(mask_count(&cleaned, 255), 150);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let zero_stride = SubjectDetectorConfig {
            saliency_stride: 0,
            ..Default::default()
        };
        assert!(SubjectDetector::new(zero_stride).is_err());

        let bad_threshold = SubjectDetectorConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());

        let negative_weight = SubjectDetectorConfig {
            weights: FusionWeights {
                edge: -0.1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(negative_weight.validate().is_err());
        assert!(SubjectDetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn detect_rejects_empty_image() {
        let image: Image<Rgba<u8>> = Image::new(0, 0);
        assert!(detect_subject(&image, &mut StdRng::seed_from_u64(0)).is_err());
    }
}
