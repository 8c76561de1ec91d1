//! Final compositing: alpha application and edge color decontamination.
//!
//! Semi-transparent edge pixels still carry some of the original background
//! color. For every pixel with `0 < alpha < 255` the compositor estimates the
//! true foreground color as the mean of nearby high-alpha pixels and blends
//!
//! ```text
//! out = fg_estimate * (alpha / 255) + original * (1 - alpha / 255)
//! ```
//!
//! Fully opaque and fully transparent pixels are never recolored.

use image::{GenericImageView, Luma, Pixel, Primitive, Rgb, Rgba};
use imageproc::{definitions::Image, map::map_colors2};
use log::debug;

use crate::error::Error;
use crate::imageops_cutout::Mask;
use crate::utils::{fill_rows, rgb_f32, round_to_u8, validate_matching_dimensions, window};

/// Trait providing functionality to apply alpha masks to images
///
/// This trait provides functionality to apply grayscale masks to RGB images
/// to generate RGBA images. This consumes the original image.
pub trait ApplyAlphaMask {
    type Mask: GenericImageView<Pixel = Luma<Self::Subpixel>>;
    type Subpixel: Primitive;

    /// Applies the specified mask to the image and generates an image with alpha channel
    ///
    /// # Errors
    ///
    /// * `Error::DimensionMismatch` - When image and mask dimensions don't match
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use imageops_cutout::{ApplyAlphaMask, Image};
    /// use image::{ImageBuffer, Luma, Rgb};
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let rgb_image: Image<Rgb<u8>> = ImageBuffer::new(10, 10);
    /// let mask: Image<Luma<u8>> = ImageBuffer::new(10, 10);
    ///
    /// let rgba_image = rgb_image.apply_alpha_mask(&mask)?;
    /// # Ok(())
    /// # }
    /// ```
    fn apply_alpha_mask(self, mask: &Self::Mask) -> Result<Image<Rgba<Self::Subpixel>>, Error>
    where
        Rgba<Self::Subpixel>: Pixel<Subpixel = Self::Subpixel>;
}

/// Trait for replacing the alpha channel of existing RGBA images
///
/// Color channels are preserved.
pub trait ReplaceAlpha {
    type Mask: GenericImageView<Pixel = Luma<Self::Subpixel>>;
    type Subpixel: Primitive;

    /// Replaces the alpha channel with the provided mask
    ///
    /// # Errors
    ///
    /// * `Error::DimensionMismatch` - When image and mask dimensions don't match
    fn replace_alpha(self, mask: &Self::Mask) -> Result<Self, Error>
    where
        Self: Sized;

    /// Replaces the alpha channel with the provided mask in-place
    fn replace_alpha_mut(&mut self, mask: &Self::Mask) -> Result<&mut Self, Error>;
}

impl<S> ApplyAlphaMask for Image<Rgb<S>>
where
    Rgb<S>: Pixel<Subpixel = S>,
    S: Primitive,
{
    type Mask = Image<Luma<S>>;
    type Subpixel = S;

    fn apply_alpha_mask(self, mask: &Self::Mask) -> Result<Image<Rgba<S>>, Error>
    where
        Rgba<S>: Pixel<Subpixel = S>,
    {
        validate_matching_dimensions(self.dimensions(), mask.dimensions())?;

        Ok(map_colors2(
            &self,
            mask,
            |Rgb([red, green, blue]), Luma([alpha])| Rgba([red, green, blue, alpha]),
        ))
    }
}

impl<S> ReplaceAlpha for Image<Rgba<S>>
where
    Rgba<S>: Pixel<Subpixel = S>,
    S: Primitive,
{
    type Mask = Image<Luma<S>>;
    type Subpixel = S;

    fn replace_alpha(self, mask: &Self::Mask) -> Result<Self, Error> {
        validate_matching_dimensions(self.dimensions(), mask.dimensions())?;

        Ok(map_colors2(
            &self,
            mask,
            |Rgba([red, green, blue, _]), Luma([alpha])| Rgba([red, green, blue, alpha]),
        ))
    }

    fn replace_alpha_mut(&mut self, mask: &Self::Mask) -> Result<&mut Self, Error> {
        validate_matching_dimensions(self.dimensions(), mask.dimensions())?;

        self.pixels_mut()
            .zip(mask.pixels())
            .for_each(|(pixel, Luma([alpha]))| pixel[3] = *alpha);

        Ok(self)
    }
}

/// Parameters of [`Compositor`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeConfig {
    /// Radius searched for opaque pixels around an edge pixel
    pub decontamination_radius: u32,
    /// Alpha above which a neighbor counts as true foreground
    pub opaque_threshold: u8,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            decontamination_radius: 2,
            opaque_threshold: 200,
        }
    }
}

/// Writes the alpha matte into the output and decontaminates soft edges.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    config: CompositeConfig,
}

impl Compositor {
    pub const fn new(config: CompositeConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &CompositeConfig {
        &self.config
    }

    /// Produces the cut-out image: colors from `image`, alpha from `alpha`,
    /// fringe colors decontaminated.
    pub fn composite(&self, image: &Image<Rgba<u8>>, alpha: &Mask) -> Result<Image<Rgba<u8>>, Error> {
        let output = image.clone().replace_alpha(alpha)?;
        Ok(self.decontaminate(&output))
    }

    /// Recolors every soft edge pixel of an RGBA image from its opaque
    /// neighbors. Neighbors are read from `image`, never from the output.
    pub fn decontaminate(&self, image: &Image<Rgba<u8>>) -> Image<Rgba<u8>> {
        let (width, height) = image.dimensions();
        let radius = self.config.decontamination_radius;
        let opaque_threshold = self.config.opaque_threshold;

        let mut output = image.clone();
        let row_len = width as usize * 4;
        fill_rows(&mut *output, row_len, |y, row| {
            let y = y as u32;
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let alpha = pixel[3];
                if alpha == 0 || alpha == 255 {
                    continue;
                }

                let mut sum = [0.0f32; 3];
                let mut count = 0u32;
                for (nx, ny) in window(x as u32, y, radius, width, height) {
                    let neighbor = image.get_pixel(nx, ny);
                    if neighbor[3] > opaque_threshold {
                        let color = rgb_f32(neighbor);
                        for c in 0..3 {
                            sum[c] += color[c];
                        }
                        count += 1;
                    }
                }
                if count == 0 {
                    continue;
                }

                let ratio = f32::from(alpha) / 255.0;
                let inv_count = 1.0 / count as f32;
                for c in 0..3 {
                    let foreground = sum[c] * inv_count;
                    let original = f32::from(pixel[c]);
                    pixel[c] = round_to_u8(foreground.mul_add(ratio, original * (1.0 - ratio)));
                }
            }
        });

        debug!(
            "compositing: {} soft edge pixels",
            image.pixels().filter(|p| p[3] != 0 && p[3] != 255).count()
        );
        output
    }
}

/// Composites with the default configuration.
pub fn composite(image: &Image<Rgba<u8>>, alpha: &Mask) -> Result<Image<Rgba<u8>>, Error> {
    Compositor::default().composite(image, alpha)
}
