//! End-to-end change-detection pipeline
//!
//! One parameterized branch (composite -> terrain augment -> indices) run
//! twice with different date intervals, then differencing and unsupervised
//! segmentation. The pre and post branches share code by construction;
//! only the interval differs.

use crate::change::change_image;
use crate::cluster::{classify, sample_stack, KmeansModel, KmeansParams, SamplingParams};
use crate::composite::median_composite;
use crate::indices::{spectral_indices, IndexParams};
use crate::masking::{mask_collection, CloudMaskParams};
use crate::terrain::{augment_with_terrain, TerrainParams};
use landslip_core::{Bounds, DateInterval, ImageStack, Raster, Result, SceneCollection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Full configuration surface of a pipeline run.
///
/// Everything the stages consume is injected here; there is no global
/// state. The date intervals are the only asymmetry between the pre- and
/// post-event branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Pre-event compositing interval
    pub pre_interval: DateInterval,
    /// Post-event compositing interval
    pub post_interval: DateInterval,
    /// Sub-region the clusterer trains on; the full image when absent
    #[serde(default)]
    pub training_region: Option<Bounds>,
    #[serde(default)]
    pub cloud: CloudMaskParams,
    #[serde(default)]
    pub terrain: TerrainParams,
    #[serde(default)]
    pub indices: IndexParams,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub kmeans: KmeansParams,
}

/// Everything a run produces
#[derive(Debug)]
pub struct PipelineOutput {
    /// Pre-event index image {NDVI, NDSI, ROG}
    pub pre_indices: ImageStack,
    /// Post-event index image {NDVI, NDSI, ROG}
    pub post_indices: ImageStack,
    /// Post-minus-pre change image
    pub change: ImageStack,
    /// The fitted cluster model
    pub model: KmeansModel,
    /// Cluster id per pixel, -1 where undefined
    pub labels: Raster<i32>,
}

/// Run the whole pipeline over a scene collection and its DEM.
pub fn run(
    collection: &SceneCollection,
    dem: &Raster<f64>,
    params: &PipelineParams,
) -> Result<PipelineOutput> {
    info!(
        scenes = collection.len(),
        "masking clouds and shadows"
    );
    let masked = mask_collection(collection, &params.cloud)?;

    let pre_indices = index_branch(&masked, &params.pre_interval, dem, params)?;
    let post_indices = index_branch(&masked, &params.post_interval, dem, params)?;

    info!("differencing index images");
    let change = change_image(&pre_indices, &post_indices)?;

    info!(
        num_pixels = params.sampling.num_pixels,
        k = params.kmeans.k,
        "training K-means segmenter"
    );
    let samples = sample_stack(&change, params.training_region.as_ref(), &params.sampling)?;
    debug!(samples = samples.len(), "training set drawn");
    let model = KmeansModel::fit(&samples, &params.kmeans)?;

    info!("labeling change image");
    let labels = classify(&change, &model)?;

    Ok(PipelineOutput {
        pre_indices,
        post_indices,
        change,
        model,
        labels,
    })
}

/// One temporal branch: composite over the interval, append terrain bands,
/// derive the index stack.
fn index_branch(
    masked: &SceneCollection,
    interval: &DateInterval,
    dem: &Raster<f64>,
    params: &PipelineParams,
) -> Result<ImageStack> {
    info!(
        start = %interval.start,
        end = %interval.end,
        contributing = masked.scenes_within(interval).len(),
        "compositing interval"
    );
    let composite = median_composite(masked, interval)?;
    let augmented = augment_with_terrain(&composite, dem, &params.terrain)?;
    spectral_indices(&augmented, &params.indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::{NDSI, NDVI, ROG};
    use chrono::NaiveDate;
    use landslip_core::{GeoTransform, ImageStack, Scene, SceneFilter};

    const SIZE: usize = 12;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, m, d).unwrap()
    }

    fn grid_transform() -> GeoTransform {
        GeoTransform::new(0.0, SIZE as f64, 1.0, -1.0)
    }

    fn band(value: f64) -> Raster<f64> {
        let mut r = Raster::filled(SIZE, SIZE, value);
        r.set_transform(grid_transform());
        r.set_nodata(Some(f64::NAN));
        r
    }

    /// Reflectance scene. With `event` set, the bottom half swaps nir and
    /// red (vegetation loss), so the index images differ spatially.
    fn scene(acquired: NaiveDate, event: bool) -> Scene {
        let make = |top: f64, bottom: f64| {
            let mut r = band(top);
            if event {
                for row in SIZE / 2..SIZE {
                    for col in 0..SIZE {
                        r.set(row, col, bottom).unwrap();
                    }
                }
            }
            r
        };
        let bands = ImageStack::from_bands([
            ("nir".to_string(), make(0.6, 0.2)),
            ("red".to_string(), make(0.2, 0.6)),
            ("green".to_string(), make(0.3, 0.3)),
        ])
        .unwrap();
        let qa = Raster::new(SIZE, SIZE);
        Scene::new(bands, qa, acquired, 1.0).unwrap()
    }

    fn dem() -> Raster<f64> {
        // Steep constant gradient so nothing is relief-masked away
        let mut d = Raster::new(SIZE, SIZE);
        d.set_transform(grid_transform());
        d.set_nodata(Some(f64::NAN));
        for row in 0..SIZE {
            for col in 0..SIZE {
                d.set(row, col, ((row + col) * 10) as f64).unwrap();
            }
        }
        d
    }

    fn collection() -> SceneCollection {
        let filter = SceneFilter {
            bounds: Bounds::new(0.0, 0.0, SIZE as f64, SIZE as f64).unwrap(),
            dates: DateInterval::new(date(1, 1), date(12, 31)).unwrap(),
            max_cloud_cover: 10.0,
        };
        let scenes = vec![
            scene(date(2, 1), false),
            scene(date(3, 1), false),
            scene(date(8, 1), true),
            scene(date(9, 1), true),
        ];
        SceneCollection::from_scenes(scenes, filter).unwrap()
    }

    fn params() -> PipelineParams {
        PipelineParams {
            pre_interval: DateInterval::new(date(1, 1), date(4, 1)).unwrap(),
            post_interval: DateInterval::new(date(5, 1), date(12, 1)).unwrap(),
            training_region: None,
            cloud: CloudMaskParams::default(),
            terrain: TerrainParams::default(),
            indices: IndexParams::default(),
            sampling: SamplingParams::default(),
            kmeans: KmeansParams {
                k: 2,
                ..Default::default()
            },
        }
    }

    #[test]
    fn full_run_produces_consistent_output() {
        let output = run(&collection(), &dem(), &params()).unwrap();

        assert_eq!(output.pre_indices.schema(), vec![NDVI, NDSI, ROG]);
        assert_eq!(output.post_indices.schema(), vec![NDVI, NDSI, ROG]);
        assert_eq!(output.change.schema(), vec![NDVI, NDSI, ROG]);
        assert_eq!(output.labels.shape(), (SIZE, SIZE));
        assert_eq!(output.model.k(), 2);

        // Labels on the interior are defined and in range; the two halves
        // of the change image separate into different clusters
        let top = output.labels.get(2, 2).unwrap();
        let bottom = output.labels.get(9, 9).unwrap();
        assert!((0..2).contains(&top));
        assert!((0..2).contains(&bottom));
        assert_ne!(top, bottom);
    }

    #[test]
    fn branches_share_logic_so_identical_intervals_cancel() {
        let mut p = params();
        // Same interval on both branches: change must be exactly zero
        p.post_interval = p.pre_interval;

        let masked = mask_collection(&collection(), &p.cloud).unwrap();
        let pre = index_branch(&masked, &p.pre_interval, &dem(), &p).unwrap();
        let post = index_branch(&masked, &p.post_interval, &dem(), &p).unwrap();
        let change = change_image(&pre, &post).unwrap();

        for (_, change_band) in change.iter() {
            for row in 0..SIZE {
                for col in 0..SIZE {
                    let v = change_band.get(row, col).unwrap();
                    if !v.is_nan() {
                        assert_eq!(v, 0.0);
                    }
                }
            }
        }
    }
}
