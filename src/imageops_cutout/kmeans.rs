//! Lloyd's k-means over RGB triples with k-means++ seeding.
//!
//! Both the subject detector (scene color clustering) and the color refiner
//! (per-class color models) cluster colors through this module. The random
//! source is always supplied by the caller so that a seeded generator yields
//! byte-identical results.

use log::debug;
use rand::Rng;

use crate::utils::color_distance_sq;

/// A color in RGB space with channels in `[0, 255]`.
pub type Color = [f32; 3];

/// Clusters `samples` into at most `k` centroids.
///
/// Centroids are seeded with k-means++ and refined for at most `iterations`
/// Lloyd steps, stopping early once assignments no longer change. A cluster
/// that loses all of its members keeps its previous centroid instead of
/// collapsing, so the result always holds `k` centroids when `samples` is
/// non-empty, possibly with duplicates.
///
/// Returns an empty vector when `samples` is empty or `k` is zero.
pub fn kmeans<R>(samples: &[Color], k: usize, iterations: usize, rng: &mut R) -> Vec<Color>
where
    R: Rng + ?Sized,
{
    if samples.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut centroids = seed_centroids(samples, k, rng);
    let mut assignments = vec![usize::MAX; samples.len()];

    for iteration in 0..iterations {
        let mut changed = false;
        for (assignment, &sample) in assignments.iter_mut().zip(samples) {
            let nearest = nearest_centroid(sample, &centroids);
            if *assignment != nearest {
                *assignment = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (&assignment, sample) in assignments.iter().zip(samples) {
            counts[assignment] += 1;
            for c in 0..3 {
                sums[assignment][c] += f64::from(sample[c]);
            }
        }

        let mut empty = 0;
        for ((centroid, sum), &count) in centroids.iter_mut().zip(&sums).zip(&counts) {
            if count == 0 {
                empty += 1;
                continue;
            }
            let inv = 1.0 / count as f64;
            *centroid = [
                (sum[0] * inv) as f32,
                (sum[1] * inv) as f32,
                (sum[2] * inv) as f32,
            ];
        }
        if empty > 0 {
            debug!(
                "k-means iteration {iteration}: {empty} of {k} clusters empty, keeping previous centroids"
            );
        }
    }

    centroids
}

/// Index of the centroid closest to `color`; ties go to the lowest index.
/// An empty `centroids` slice yields 0.
#[inline]
pub fn nearest_centroid(color: Color, centroids: &[Color]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (index, &centroid) in centroids.iter().enumerate() {
        let distance = color_distance_sq(color, centroid);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

/// k-means++ seeding: each further seed is drawn with probability
/// proportional to its squared distance from the closest seed so far.
fn seed_centroids<R>(samples: &[Color], k: usize, rng: &mut R) -> Vec<Color>
where
    R: Rng + ?Sized,
{
    let mut centroids = Vec::with_capacity(k);
    centroids.push(samples[rng.random_range(0..samples.len())]);

    let mut distances: Vec<f32> = samples
        .iter()
        .map(|&sample| color_distance_sq(sample, centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().map(|&d| f64::from(d)).sum();
        let next = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = samples.len() - 1;
            for (index, &distance) in distances.iter().enumerate() {
                cumulative += f64::from(distance);
                if cumulative > target {
                    chosen = index;
                    break;
                }
            }
            chosen
        } else {
            // Every sample coincides with a seed already chosen.
            rng.random_range(0..samples.len())
        };

        let centroid = samples[next];
        centroids.push(centroid);
        for (distance, &sample) in distances.iter_mut().zip(samples) {
            *distance = distance.min(color_distance_sq(sample, centroid));
        }
    }

    centroids
}
