//! Four-stage background removal pipeline.
//!
//! ```text
//! Idle -> Detecting (10%) -> Refining (30%) -> Matting (50% -> 70%)
//!      -> Compositing (70% -> 90%) -> Done (100%)
//! ```
//!
//! Every stage consumes the previous stage's mask and produces a new one;
//! nothing is shared between runs. A failing stage moves the pipeline to
//! `Failed(stage)` and no partial output is returned. Cancellation is only
//! observed at stage boundaries.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use image::{Rgb, Rgba};
use imageproc::definitions::Image;
use imageproc::map::map_colors;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, PipelineError};
use crate::imageops_cutout::alpha_matte::{AlphaMatteEstimator, MatteConfig};
use crate::imageops_cutout::color_refiner::{ColorRefiner, RefinerConfig};
use crate::imageops_cutout::composite::{CompositeConfig, Compositor};
use crate::imageops_cutout::quality::QualityLevel;
use crate::imageops_cutout::subject_detector::{SubjectDetector, SubjectDetectorConfig};

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Detecting,
    Refining,
    Matting,
    Compositing,
}

impl PipelineStage {
    pub const ALL: [Self; 4] = [
        Self::Detecting,
        Self::Refining,
        Self::Matting,
        Self::Compositing,
    ];

    /// Progress percentage reported when the stage starts.
    pub const fn entry_progress(self) -> u8 {
        match self {
            Self::Detecting => 10,
            Self::Refining => 30,
            Self::Matting => 50,
            Self::Compositing => 70,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Detecting => "subject detection",
            Self::Refining => "color refinement",
            Self::Matting => "alpha matting",
            Self::Compositing => "compositing",
        })
    }
}

/// Position of a [`BackgroundRemover`] in its state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineState {
    #[default]
    Idle,
    Running(PipelineStage),
    Done,
    /// Terminal; the caller has to resubmit
    Failed(PipelineStage),
    /// Terminal; cancelled before the stage started
    Cancelled(PipelineStage),
}

/// Receives progress updates and may request cancellation.
///
/// Closures taking the percentage implement this trait directly.
pub trait ProgressObserver {
    /// Called with 10, 30, 50, 70, 90 and 100 as the run advances.
    fn on_progress(&mut self, percent: u8);

    /// Polled before every stage; returning `true` abandons the run.
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<F> ProgressObserver for F
where
    F: FnMut(u8),
{
    fn on_progress(&mut self, percent: u8) {
        self(percent);
    }
}

/// Observer that ignores all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _percent: u8) {}
}

/// Configuration of a complete run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub detector: SubjectDetectorConfig,
    pub refiner: RefinerConfig,
    pub matte: MatteConfig,
    pub composite: CompositeConfig,
    /// Only used to warn about oversized inputs
    pub quality: QualityLevel,
    /// Seed for k-means initialization; `None` draws one from the OS
    pub seed: Option<u64>,
}

impl PipelineConfig {
    /// Validates the configuration of every stage.
    pub fn validate(&self) -> Result<(), Error> {
        self.detector.validate()?;
        self.refiner.validate()?;
        self.matte.validate()
    }
}

/// Runs the detection, refinement, matting and compositing stages in order.
///
/// # Examples
///
/// ```no_run
/// use imageops_cutout::{BackgroundRemover, Image, PipelineConfig, PipelineState};
/// use image::Rgba;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let image: Image<Rgba<u8>> = Image::new(640, 480);
/// let mut remover = BackgroundRemover::new(PipelineConfig {
///     seed: Some(42),
///     ..Default::default()
/// })?;
///
/// let cutout = remover.run(&image, &mut |percent: u8| println!("{percent}%"))?;
/// assert_eq!(remover.state(), PipelineState::Done);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct BackgroundRemover {
    config: PipelineConfig,
    state: PipelineState,
}

impl BackgroundRemover {
    /// Create a remover after validating `config`.
    pub fn new(config: PipelineConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            state: PipelineState::Idle,
        })
    }

    /// Remover with default parameters for the given quality tier.
    pub fn with_quality(quality: QualityLevel) -> Self {
        Self {
            config: PipelineConfig {
                quality,
                ..Default::default()
            },
            state: PipelineState::Idle,
        }
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Removes the background of `image`.
    ///
    /// The output has the dimensions of `image`; colors of fully opaque and
    /// fully transparent pixels are passed through unchanged.
    ///
    /// # Errors
    ///
    /// * `PipelineError::InvalidDimensions` - When the image is empty
    /// * `PipelineError::StageFailure` - When a stage fails
    /// * `PipelineError::Cancelled` - When `observer` cancels the run
    pub fn run<O>(
        &mut self,
        image: &Image<Rgba<u8>>,
        observer: &mut O,
    ) -> Result<Image<Rgba<u8>>, PipelineError>
    where
        O: ProgressObserver + ?Sized,
    {
        self.state = PipelineState::Idle;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions {
                width,
                height,
                buffer_len: image.as_raw().len(),
            });
        }

        let quality = self.config.quality;
        if !quality.fits(width, height) {
            warn!(
                "{width}x{height} input exceeds the {quality:?} working size of {} pixels",
                quality.max_dimension()
            );
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let config = self.config.clone();
        let started = Instant::now();

        let mask = self.run_stage(PipelineStage::Detecting, observer, || {
            SubjectDetector::new(config.detector)?.detect(image, &mut rng)
        })?;
        let refined = self.run_stage(PipelineStage::Refining, observer, || {
            ColorRefiner::new(config.refiner)?.refine(image, &mask, &mut rng)
        })?;
        drop(mask);
        let alpha = self.run_stage(PipelineStage::Matting, observer, || {
            AlphaMatteEstimator::new(config.matte)?.estimate(image, &refined)
        })?;
        drop(refined);
        let output = self.run_stage(PipelineStage::Compositing, observer, || {
            Compositor::new(config.composite).composite(image, &alpha)
        })?;
        observer.on_progress(90);

        self.state = PipelineState::Done;
        observer.on_progress(100);
        debug!(
            "background removal of {width}x{height} finished in {:?}",
            started.elapsed()
        );
        Ok(output)
    }

    fn run_stage<T, O, F>(
        &mut self,
        stage: PipelineStage,
        observer: &mut O,
        stage_fn: F,
    ) -> Result<T, PipelineError>
    where
        O: ProgressObserver + ?Sized,
        F: FnOnce() -> Result<T, Error>,
    {
        if observer.is_cancelled() {
            debug!("background removal cancelled before {stage}");
            self.state = PipelineState::Cancelled(stage);
            return Err(PipelineError::Cancelled { stage });
        }

        self.state = PipelineState::Running(stage);
        observer.on_progress(stage.entry_progress());
        let started = Instant::now();

        let result = catch_unwind(AssertUnwindSafe(stage_fn))
            .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload.as_ref()))));

        match result {
            Ok(value) => {
                debug!("{stage} finished in {:?}", started.elapsed());
                Ok(value)
            }
            Err(source) => {
                debug!("{stage} failed: {source}");
                self.state = PipelineState::Failed(stage);
                Err(PipelineError::StageFailure { stage, source })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "stage panicked".to_string())
}

/// Trait for removing the background of an in-memory image
pub trait RemoveBackground {
    /// Runs the full pipeline with default parameters for `quality`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use imageops_cutout::{Image, QualityLevel, RemoveBackground};
    /// use image::Rgb;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let photo: Image<Rgb<u8>> = Image::new(320, 240);
    /// let cutout = photo.remove_background(QualityLevel::High)?;
    /// # Ok(())
    /// # }
    /// ```
    fn remove_background(&self, quality: QualityLevel) -> Result<Image<Rgba<u8>>, PipelineError>;
}

impl RemoveBackground for Image<Rgba<u8>> {
    fn remove_background(&self, quality: QualityLevel) -> Result<Image<Rgba<u8>>, PipelineError> {
        BackgroundRemover::with_quality(quality).run(self, &mut NoProgress)
    }
}

impl RemoveBackground for Image<Rgb<u8>> {
    fn remove_background(&self, quality: QualityLevel) -> Result<Image<Rgba<u8>>, PipelineError> {
        let rgba = map_colors(self, |Rgb([red, green, blue])| Rgba([red, green, blue, 255]));
        rgba.remove_background(quality)
    }
}

/// Removes the background of a raw, row-major RGBA buffer.
///
/// # Errors
///
/// * `PipelineError::InvalidDimensions` - When `width` or `height` is zero or
///   `buffer` does not hold exactly `width * height * 4` bytes
/// * `PipelineError::StageFailure` - When a stage fails
pub fn remove_background(
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    quality: QualityLevel,
) -> Result<Image<Rgba<u8>>, PipelineError> {
    remove_background_with_progress(buffer, width, height, quality, &mut NoProgress)
}

/// [`remove_background`] reporting progress to `observer`.
pub fn remove_background_with_progress<O>(
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    quality: QualityLevel,
    observer: &mut O,
) -> Result<Image<Rgba<u8>>, PipelineError>
where
    O: ProgressObserver + ?Sized,
{
    let buffer_len = buffer.len();
    let invalid = PipelineError::InvalidDimensions {
        width,
        height,
        buffer_len,
    };
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4));
    if width == 0 || height == 0 || expected != Some(buffer_len) {
        return Err(invalid);
    }

    let image = Image::from_raw(width, height, buffer).ok_or(invalid)?;
    BackgroundRemover::with_quality(quality).run(&image, observer)
}
