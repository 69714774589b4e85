//! Cloud and cloud-shadow masking
//!
//! Knocks out pixels whose QA bitmask has the cloud-shadow or cloud flag
//! set. In the Landsat Collection 2 Level-2 `QA_PIXEL` layout those are
//! bits 3 and 5, the defaults here.

use landslip_core::{Error, ImageStack, Result, Scene, SceneCollection};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters for the QA bitmask filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudMaskParams {
    /// Bit position of the cloud-shadow flag
    pub shadow_bit: u8,
    /// Bit position of the cloud flag
    pub cloud_bit: u8,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            shadow_bit: 3,
            cloud_bit: 5,
        }
    }
}

/// Mask one scene's bands against its QA bitmask.
///
/// Pixels with either flag set become undefined in every band; everything
/// else passes through unchanged. Band schema, QA band and acquisition
/// metadata are preserved, and applying the filter twice is a no-op the
/// second time.
pub fn mask_clouds(scene: &Scene, params: &CloudMaskParams) -> Result<Scene> {
    for (name, bit) in [
        ("shadow_bit", params.shadow_bit),
        ("cloud_bit", params.cloud_bit),
    ] {
        if bit >= 16 {
            return Err(Error::InvalidParameter {
                name,
                value: bit.to_string(),
                reason: "QA bitmask is 16 bits wide".into(),
            });
        }
    }

    let qa = scene.qa();
    let (rows, cols) = qa.shape();
    let contaminated = (1u16 << params.shadow_bit) | (1u16 << params.cloud_bit);

    let mut masked = ImageStack::new();
    for (name, band) in scene.bands().iter() {
        let data: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![f64::NAN; cols];
                for col in 0..cols {
                    let flags = unsafe { qa.get_unchecked(row, col) };
                    if flags & contaminated != 0 {
                        continue;
                    }
                    let v = unsafe { band.get_unchecked(row, col) };
                    if band.is_nodata(v) {
                        continue;
                    }
                    row_data[col] = v;
                }
                row_data
            })
            .collect();

        let mut out = band.with_same_meta::<f64>(rows, cols);
        out.set_nodata(Some(f64::NAN));
        *out.data_mut() = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        masked.push(name, out)?;
    }

    Scene::new(masked, qa.clone(), scene.acquired(), scene.cloud_cover())
}

/// Mask every scene in a collection
pub fn mask_collection(
    collection: &SceneCollection,
    params: &CloudMaskParams,
) -> Result<SceneCollection> {
    if collection.is_empty() {
        return Ok(collection.clone());
    }
    let masked = collection
        .scenes()
        .iter()
        .map(|scene| mask_clouds(scene, params))
        .collect::<Result<Vec<_>>>()?;
    SceneCollection::from_scenes(masked, collection.filter().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use landslip_core::Raster;

    fn test_scene(qa_values: &[(usize, usize, u16)]) -> Scene {
        let mut red = Raster::filled(3, 3, 0.2);
        red.set_nodata(Some(f64::NAN));
        let mut nir = Raster::filled(3, 3, 0.6);
        nir.set_nodata(Some(f64::NAN));
        let bands = ImageStack::from_bands([
            ("red".to_string(), red),
            ("nir".to_string(), nir),
        ])
        .unwrap();

        let mut qa: Raster<u16> = Raster::new(3, 3);
        for &(row, col, flags) in qa_values {
            qa.set(row, col, flags).unwrap();
        }

        Scene::new(
            bands,
            qa,
            NaiveDate::from_ymd_opt(2015, 6, 1).unwrap(),
            2.0,
        )
        .unwrap()
    }

    #[test]
    fn shadow_bit_masks_every_band() {
        // Bit 3 set at (0, 0) only
        let scene = test_scene(&[(0, 0, 1 << 3)]);
        let masked = mask_clouds(&scene, &CloudMaskParams::default()).unwrap();

        for (_, band) in masked.bands().iter() {
            assert!(band.get(0, 0).unwrap().is_nan());
            assert!(!band.get(1, 1).unwrap().is_nan());
        }
    }

    #[test]
    fn cloud_bit_masks_too() {
        let scene = test_scene(&[(2, 1, 1 << 5)]);
        let masked = mask_clouds(&scene, &CloudMaskParams::default()).unwrap();
        assert!(masked.bands().band("red").unwrap().get(2, 1).unwrap().is_nan());
    }

    #[test]
    fn unrelated_bits_pass_through() {
        // Bits 0 and 7 are not cloud flags
        let scene = test_scene(&[(1, 1, (1 << 0) | (1 << 7))]);
        let masked = mask_clouds(&scene, &CloudMaskParams::default()).unwrap();
        assert_eq!(masked.bands().band("red").unwrap().get(1, 1).unwrap(), 0.2);
    }

    #[test]
    fn masking_is_idempotent() {
        let scene = test_scene(&[(0, 0, 1 << 3), (2, 2, 1 << 5)]);
        let once = mask_clouds(&scene, &CloudMaskParams::default()).unwrap();
        let twice = mask_clouds(&once, &CloudMaskParams::default()).unwrap();

        for ((_, a), (_, b)) in once.bands().iter().zip(twice.bands().iter()) {
            for row in 0..3 {
                for col in 0..3 {
                    let va = a.get(row, col).unwrap();
                    let vb = b.get(row, col).unwrap();
                    assert!(va == vb || (va.is_nan() && vb.is_nan()));
                }
            }
        }
    }

    #[test]
    fn metadata_preserved() {
        let scene = test_scene(&[]);
        let masked = mask_clouds(&scene, &CloudMaskParams::default()).unwrap();
        assert_eq!(masked.acquired(), scene.acquired());
        assert_eq!(masked.cloud_cover(), scene.cloud_cover());
        assert_eq!(masked.bands().schema(), scene.bands().schema());
    }

    #[test]
    fn out_of_range_bit_rejected() {
        let scene = test_scene(&[]);
        let params = CloudMaskParams {
            shadow_bit: 16,
            cloud_bit: 5,
        };
        assert!(mask_clouds(&scene, &params).is_err());
    }
}
