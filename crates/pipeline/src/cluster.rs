//! Unsupervised segmentation
//!
//! Samples pixel vectors from a change image, fits a K-means model over
//! them (k-means++ initialization, Lloyd's iteration), then labels every
//! pixel of the full image. The fitted model is immutable; training and
//! inference are both reproducible given the seeds.

use landslip_core::{Bounds, Error, ImageStack, Raster, Result};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Label value for pixels undefined in any input band
pub const UNLABELED: i32 = -1;

/// Parameters for training-sample extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Number of pixel vectors to draw
    pub num_pixels: usize,
    /// RNG seed for the draw
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            num_pixels: 5000,
            seed: 42,
        }
    }
}

/// Parameters for K-means clustering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeansParams {
    /// Number of clusters
    pub k: usize,
    /// Iteration cap for Lloyd's algorithm
    pub max_iterations: usize,
    /// Stop when no centroid moves farther than this
    pub convergence: f64,
    /// RNG seed for centroid initialization
    pub seed: u64,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            k: 8,
            max_iterations: 100,
            convergence: 1e-3,
            seed: 42,
        }
    }
}

/// Draw pixel vectors at random from a stack, without replacement.
///
/// Restricted to `region` when given (intersected with the grid). Pixels
/// undefined in any band are excluded before the draw; if every candidate
/// is excluded the training set is degenerate and this fails rather than
/// feeding the clusterer nothing.
pub fn sample_stack(
    stack: &ImageStack,
    region: Option<&Bounds>,
    params: &SamplingParams,
) -> Result<Vec<Vec<f64>>> {
    if params.num_pixels == 0 {
        return Err(Error::InvalidParameter {
            name: "num_pixels",
            value: "0".into(),
            reason: "must draw at least one sample".into(),
        });
    }

    let (rows, cols) = stack
        .shape()
        .ok_or_else(|| Error::Algorithm("cannot sample an empty stack".into()))?;
    let transform = stack.transform().expect("non-empty stack has a transform");

    let (row0, row1, col0, col1) = match region {
        Some(bounds) => bounds
            .to_pixel_window(transform, rows, cols)
            .ok_or_else(|| {
                Error::DegenerateTraining(
                    "training region does not intersect the image".into(),
                )
            })?,
        None => (0, rows, 0, cols),
    };

    let bands: Vec<&Raster<f64>> = stack.iter().map(|(_, band)| band).collect();

    // Candidate pixels: fully defined vectors inside the window
    let mut candidates: Vec<Vec<f64>> = Vec::new();
    for row in row0..row1 {
        for col in col0..col1 {
            let mut vector = Vec::with_capacity(bands.len());
            for band in &bands {
                let v = unsafe { band.get_unchecked(row, col) };
                if band.is_nodata(v) {
                    break;
                }
                vector.push(v);
            }
            if vector.len() == bands.len() {
                candidates.push(vector);
            }
        }
    }

    if candidates.is_empty() {
        return Err(Error::DegenerateTraining(
            "no defined pixels available in the training region".into(),
        ));
    }

    if candidates.len() <= params.num_pixels {
        return Ok(candidates);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let picked = rand::seq::index::sample(&mut rng, candidates.len(), params.num_pixels);
    Ok(picked.into_iter().map(|i| candidates[i].clone()).collect())
}

/// A fitted K-means partition.
///
/// Fit once, then applied; there are no online updates.
#[derive(Debug, Clone)]
pub struct KmeansModel {
    centroids: Vec<Vec<f64>>,
}

impl KmeansModel {
    /// Fit a model over sample vectors.
    ///
    /// Fails when `k < 2`, when sample dimensions disagree, or when the
    /// samples contain fewer distinct points than clusters.
    pub fn fit(samples: &[Vec<f64>], params: &KmeansParams) -> Result<Self> {
        if params.k < 2 {
            return Err(Error::InvalidParameter {
                name: "k",
                value: params.k.to_string(),
                reason: "K-means requires at least 2 clusters".into(),
            });
        }
        let dims = match samples.first() {
            Some(first) => first.len(),
            None => {
                return Err(Error::DegenerateTraining(
                    "cannot fit a model on zero samples".into(),
                ))
            }
        };
        if samples.iter().any(|s| s.len() != dims) {
            return Err(Error::Algorithm(
                "sample vectors have inconsistent dimensions".into(),
            ));
        }

        let distinct = count_distinct(samples);
        if distinct < params.k {
            return Err(Error::DegenerateTraining(format!(
                "{} clusters requested but only {} distinct sample vectors",
                params.k, distinct
            )));
        }

        let mut centroids = init_plus_plus(samples, params.k, params.seed);
        let mut labels = vec![0usize; samples.len()];

        for _ in 0..params.max_iterations {
            // Assignment step
            labels
                .par_iter_mut()
                .zip(samples.par_iter())
                .for_each(|(label, sample)| {
                    *label = nearest_centroid(sample, &centroids);
                });

            // Update step
            let mut sums = vec![vec![0.0; dims]; params.k];
            let mut counts = vec![0usize; params.k];
            for (sample, &label) in samples.iter().zip(labels.iter()) {
                counts[label] += 1;
                for (acc, v) in sums[label].iter_mut().zip(sample) {
                    *acc += v;
                }
            }

            let mut max_shift = 0.0_f64;
            for ((sum, &count), centroid) in
                sums.iter_mut().zip(counts.iter()).zip(centroids.iter_mut())
            {
                if count == 0 {
                    continue; // Keep the empty cluster's centroid
                }
                for v in sum.iter_mut() {
                    *v /= count as f64;
                }
                max_shift = max_shift.max(distance(sum, centroid).sqrt());
                centroid.clone_from(sum);
            }

            if max_shift < params.convergence {
                break;
            }
        }

        Ok(Self { centroids })
    }

    /// Number of clusters
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Dimensionality of the input vectors
    pub fn dims(&self) -> usize {
        self.centroids.first().map_or(0, Vec::len)
    }

    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    /// Label of the nearest centroid, always in `[0, k)`.
    ///
    /// Deterministic: distance ties resolve to the lowest cluster index.
    pub fn predict(&self, vector: &[f64]) -> usize {
        nearest_centroid(vector, &self.centroids)
    }
}

/// Label every pixel of a stack with its cluster id.
///
/// Output labels are in `[0, k)`; pixels undefined in any band become
/// [`UNLABELED`], with the raster's nodata set accordingly.
pub fn classify(stack: &ImageStack, model: &KmeansModel) -> Result<Raster<i32>> {
    let (rows, cols) = stack
        .shape()
        .ok_or_else(|| Error::Algorithm("cannot classify an empty stack".into()))?;
    if stack.len() != model.dims() {
        return Err(Error::Algorithm(format!(
            "stack has {} bands but the model was trained on {}-dimensional vectors",
            stack.len(),
            model.dims()
        )));
    }

    let bands: Vec<&Raster<f64>> = stack.iter().map(|(_, band)| band).collect();

    let data: Vec<i32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![UNLABELED; cols];
            let mut vector = vec![0.0; bands.len()];
            for col in 0..cols {
                let mut defined = true;
                for (slot, band) in vector.iter_mut().zip(&bands) {
                    let v = unsafe { band.get_unchecked(row, col) };
                    if band.is_nodata(v) {
                        defined = false;
                        break;
                    }
                    *slot = v;
                }
                if defined {
                    row_data[col] = model.predict(&vector) as i32;
                }
            }
            row_data
        })
        .collect();

    let template = stack.iter().next().expect("non-empty stack").1;
    let mut labels = template.with_same_meta::<i32>(rows, cols);
    labels.set_nodata(Some(UNLABELED));
    *labels.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(labels)
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
}

fn nearest_centroid(vector: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance(vector, centroid);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// k-means++ seeding: the first centroid is drawn uniformly, each further
/// one with probability proportional to squared distance from the nearest
/// centroid chosen so far.
fn init_plus_plus(samples: &[Vec<f64>], k: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut centroids = Vec::with_capacity(k);
    centroids.push(samples[rng.gen_range(0..samples.len())].clone());

    let mut dists: Vec<f64> = vec![f64::INFINITY; samples.len()];
    while centroids.len() < k {
        let newest = centroids.last().expect("at least one centroid");
        for (d, sample) in dists.iter_mut().zip(samples) {
            *d = d.min(distance(sample, newest));
        }

        let total: f64 = dists.iter().sum();
        if total <= 0.0 {
            // All remaining mass sits on existing centroids; fall back to
            // an arbitrary distinct-by-index pick
            centroids.push(samples[centroids.len() % samples.len()].clone());
            continue;
        }

        let mut target = rng.gen::<f64>() * total;
        let mut chosen = samples.len() - 1;
        for (i, d) in dists.iter().enumerate() {
            target -= d;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(samples[chosen].clone());
    }

    centroids
}

fn count_distinct(samples: &[Vec<f64>]) -> usize {
    let mut keys: Vec<Vec<u64>> = samples
        .iter()
        .map(|s| s.iter().map(|v| v.to_bits()).collect())
        .collect();
    keys.sort();
    keys.dedup();
    keys.len()
}
