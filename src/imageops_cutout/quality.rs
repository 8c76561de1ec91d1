use image::imageops::{resize, FilterType};
use image::Rgba;
use imageproc::definitions::Image;

/// Working-resolution tier requested by the caller.
///
/// The tier only caps the image size; every algorithm parameter stays the
/// same across tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QualityLevel {
    Fast,
    #[default]
    Medium,
    High,
    UltraHd,
}

impl QualityLevel {
    /// Largest allowed width or height, in pixels.
    pub const fn max_dimension(self) -> u32 {
        match self {
            Self::Fast => 800,
            Self::Medium => 1200,
            Self::High => 1600,
            Self::UltraHd => 2400,
        }
    }

    /// Whether an image of `width` x `height` fits within the cap.
    pub const fn fits(self, width: u32, height: u32) -> bool {
        width <= self.max_dimension() && height <= self.max_dimension()
    }

    /// Dimensions after scaling down to the cap, aspect ratio preserved.
    /// Images that already fit are returned unchanged.
    pub fn working_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.fits(width, height) {
            return (width, height);
        }
        let scale = self.max_dimension() as f64 / f64::from(width.max(height));
        let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).clamp(1, self.max_dimension());
        (scaled(width), scaled(height))
    }
}

/// Downscales `image` so that it fits `quality`.
///
/// This is meant for the image-loading side, before handing the buffer to
/// the background remover. Images that already fit are cloned as is.
pub fn fit_to_quality(image: &Image<Rgba<u8>>, quality: QualityLevel) -> Image<Rgba<u8>> {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = quality.working_size(width, height);
    if (target_width, target_height) == (width, height) {
        return image.clone();
    }
    resize(image, target_width, target_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_dimension_per_tier() {
        assert_eq!(QualityLevel::Fast.max_dimension(), 800);
        assert_eq!(QualityLevel::Medium.max_dimension(), 1200);
        assert_eq!(QualityLevel::High.max_dimension(), 1600);
        assert_eq!(QualityLevel::UltraHd.max_dimension(), 2400);
        assert_eq!(QualityLevel::default(), QualityLevel::Medium);
    }

    #[test]
    fn working_size_preserves_aspect_ratio() {
        assert_eq!(QualityLevel::Fast.working_size(640, 480), (640, 480));
        assert_eq!(QualityLevel::Fast.working_size(1600, 1200), (800, 600));
        assert_eq!(QualityLevel::Fast.working_size(1000, 4000), (200, 800));
        assert_eq!(QualityLevel::Fast.working_size(8000, 1), (800, 1));
    }

    #[test]
    fn fit_to_quality_downscales_only_when_needed() {
        let small: Image<Rgba<u8>> = Image::from_pixel(100, 50, Rgba([1, 2, 3, 255]));
        assert_eq!(fit_to_quality(&small, QualityLevel::Fast), small);

        let large: Image<Rgba<u8>> = Image::from_pixel(1000, 500, Rgba([1, 2, 3, 255]));
        let fitted = fit_to_quality(&large, QualityLevel::Fast);
        assert_eq!(fitted.dimensions(), (800, 400));
    }
}
