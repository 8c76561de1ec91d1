//! Tests with real image files
//!
//! These tests save synthetic photos as PNG, load them back and run the
//! background remover on the decoded data, including writing the cut-out
//! with its alpha channel to disk.

#![cfg_attr(not(feature = "test"), allow(dead_code, unused_imports))]

use image::{Rgb, RgbImage, RgbaImage};
use imageops_cutout::{BackgroundRemover, Image, PipelineConfig, QualityLevel, RemoveBackground};
use std::path::{Path, PathBuf};

/// Get the path to test resources directory
fn resources_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("resources")
}

/// Create a product photo (round subject on a light backdrop) and save it as PNG
fn create_and_save_product_photo(filename: &str, width: u32, height: u32) -> PathBuf {
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let radius = width.min(height) as f32 * 0.3;

    let image: RgbImage = RgbImage::from_fn(width, height, |x, y| {
        let distance = (x as f32 - center_x).hypot(y as f32 - center_y);
        if distance < radius {
            // Subject - saturated orange with slight shading
            let shade = (distance / radius * 30.0) as u8;
            Rgb([230 - shade, 120 - shade / 2, 20])
        } else {
            // Backdrop - light gray with a gentle vertical gradient
            let level = 235 + (y * 15 / height) as u8;
            Rgb([level, level, level])
        }
    });

    let path = resources_dir().join(filename);
    std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create resources directory");
    image.save(&path).expect("Failed to save product photo");
    path
}

#[cfg(feature = "test")]
#[test]
fn test_cutout_of_loaded_png() {
    let path = create_and_save_product_photo("product_photo.png", 120, 90);

    let loaded = image::open(&path).expect("Failed to load product photo");
    let rgb: Image<Rgb<u8>> = Image::from(loaded.to_rgb8());
    assert_eq!(rgb.dimensions(), (120, 90));

    let cutout = rgb
        .remove_background(QualityLevel::Fast)
        .expect("Background removal should succeed");

    assert_eq!(cutout.dimensions(), (120, 90));
    // Subject center is opaque orange
    let center = cutout.get_pixel(60, 45);
    assert_eq!(center[3], 255);
    assert_eq!(center[0], 230);
    // Backdrop corners are transparent
    assert_eq!(cutout.get_pixel(2, 2)[3], 0);
    assert_eq!(cutout.get_pixel(117, 87)[3], 0);
}

#[cfg(feature = "test")]
#[test]
fn test_cutout_survives_png_round_trip() {
    let path = create_and_save_product_photo("product_round_trip.png", 80, 80);
    let rgba: Image<image::Rgba<u8>> = image::open(&path)
        .expect("Failed to load product photo")
        .to_rgba8();

    let mut remover = BackgroundRemover::new(PipelineConfig {
        seed: Some(5),
        ..Default::default()
    })
    .expect("Default configuration should be valid");
    let cutout = remover
        .run(&rgba, &mut |_: u8| {})
        .expect("Background removal should succeed");

    let out_path = resources_dir().join("product_round_trip_cutout.png");
    cutout.save(&out_path).expect("Failed to save cutout");

    let reloaded: RgbaImage = image::open(&out_path)
        .expect("Failed to load cutout")
        .to_rgba8();
    assert_eq!(reloaded, cutout);
    assert!(reloaded.pixels().any(|p| p[3] == 0));
    assert!(reloaded.pixels().any(|p| p[3] == 255));
}
