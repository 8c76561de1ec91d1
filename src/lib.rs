mod error;
mod imageops_cutout;
mod utils;

#[cfg(test)]
mod test_utils;

use image::{ImageBuffer, Pixel};

pub use error::{Error, PipelineError};
pub use imageops_cutout::alpha_matte::{estimate_alpha, solve_alpha, AlphaMatteEstimator, MatteConfig};
pub use imageops_cutout::color_refiner::{
    refine_mask, ColorComponent, ColorModel, ColorRefiner, RefinerConfig, NEUTRAL_PROBABILITY,
};
pub use imageops_cutout::composite::{
    composite, ApplyAlphaMask, CompositeConfig, Compositor, ReplaceAlpha,
};
pub use imageops_cutout::kmeans::{kmeans, nearest_centroid, Color};
pub use imageops_cutout::mask_cleanup::{
    binarize, close_mask, fill_enclosed_holes, open_mask, remove_small_regions,
};
pub use imageops_cutout::pipeline::{
    remove_background, remove_background_with_progress, BackgroundRemover, NoProgress,
    PipelineConfig, PipelineStage, PipelineState, ProgressObserver, RemoveBackground,
};
pub use imageops_cutout::quality::{fit_to_quality, QualityLevel};
pub use imageops_cutout::subject_detector::{
    clean_mask, cluster_colors, detect_subject, edge_map, saliency_map, ClusterGrid,
    FusionWeights, SubjectDetector, SubjectDetectorConfig,
};
pub use imageops_cutout::trimap::{Trimap, TrimapLabel};
pub use imageops_cutout::Mask;

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;
