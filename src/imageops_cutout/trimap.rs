use image::Luma;

use crate::imageops_cutout::Mask;
use crate::utils::window;

/// Classification of one trimap pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrimapLabel {
    /// Certainly part of the subject, alpha 255
    Foreground,
    /// Certainly background, alpha 0
    Background,
    /// Alpha has to be estimated
    Unknown,
}

/// Three-valued partition of an image into definite foreground, definite
/// background and an unknown band around the subject outline.
///
/// A trimap is derived once from a refined mask and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimap {
    width: u32,
    height: u32,
    labels: Vec<TrimapLabel>,
}

impl Trimap {
    /// Labels each pixel from the mask values in its `radius` window.
    ///
    /// A pixel is [`TrimapLabel::Foreground`] when every in-bounds sample
    /// exceeds `foreground_threshold`, [`TrimapLabel::Background`] when every
    /// sample is below `background_threshold`, and unknown otherwise.
    pub fn from_mask(
        mask: &Mask,
        radius: u32,
        foreground_threshold: u8,
        background_threshold: u8,
    ) -> Self {
        let (width, height) = mask.dimensions();
        let labels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| {
                let mut all_foreground = true;
                let mut all_background = true;
                for (nx, ny) in window(x, y, radius, width, height) {
                    let Luma([value]) = *mask.get_pixel(nx, ny);
                    all_foreground &= value > foreground_threshold;
                    all_background &= value < background_threshold;
                }
                if all_foreground {
                    TrimapLabel::Foreground
                } else if all_background {
                    TrimapLabel::Background
                } else {
                    TrimapLabel::Unknown
                }
            })
            .collect();

        Self {
            width,
            height,
            labels,
        }
    }

    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn label(&self, x: u32, y: u32) -> TrimapLabel {
        self.labels[(y * self.width + x) as usize]
    }

    pub fn labels(&self) -> &[TrimapLabel] {
        &self.labels
    }

    /// Number of pixels carrying `label`.
    pub fn count(&self, label: TrimapLabel) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Renders the trimap as a mask: 255, 0 and 128 for unknown.
    pub fn to_mask(&self) -> Mask {
        Mask::from_fn(self.width, self.height, |x, y| {
            Luma([match self.label(x, y) {
                TrimapLabel::Foreground => 255,
                TrimapLabel::Background => 0,
                TrimapLabel::Unknown => 128,
            }])
        })
    }
}
