use image::Luma;
use imageproc::definitions::Image;

pub mod alpha_matte;
pub mod color_refiner;
pub mod composite;
pub mod kmeans;
pub mod mask_cleanup;
pub mod pipeline;
pub mod quality;
pub mod subject_detector;
pub mod trimap;

/// Single-channel mask; binary masks use only 0 and 255.
pub type Mask = Image<Luma<u8>>;
