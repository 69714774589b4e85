//! Spectral index derivation
//!
//! Normalized-difference and ratio primitives plus the three-index engine
//! used by the change pipeline: NDVI, NDSI and ROG. The derived bands are
//! appended to the input stack and an explicit selection then keeps only
//! the three indices, dropping reflectance and terrain bands before
//! differencing.

use landslip_core::{Error, ImageStack, Raster, Result};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Output band name for the vegetation index
pub const NDVI: &str = "NDVI";
/// Output band name for the soil-brightness index
pub const NDSI: &str = "NDSI";
/// Output band name for the red-over-green ratio
pub const ROG: &str = "ROG";

/// Guard against division by ~zero denominators
const DIV_EPS: f64 = 1e-10;

/// Input band pairs for the three indices.
///
/// NDVI and NDSI are normalized differences of `(a, b)`; ROG is the ratio
/// `numerator / denominator`. NDSI keeps its green/red operand order on
/// purpose: downstream differencing depends on the computed formula, not
/// on the textbook definition the name suggests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Normalized-difference operands for NDVI
    pub ndvi: (String, String),
    /// Normalized-difference operands for NDSI
    pub ndsi: (String, String),
    /// Ratio operands for ROG
    pub rog: (String, String),
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            ndvi: ("nir".into(), "red".into()),
            ndsi: ("green".into(), "red".into()),
            rog: ("red".into(), "green".into()),
        }
    }
}

/// Normalized difference of two bands:
///
/// `(a - b) / (a + b)`
///
/// Bounded to [-1, 1]. Pixels where the sum is ~zero, or where either
/// input is undefined, are undefined in the output.
pub fn normalized_difference(a: &Raster<f64>, b: &Raster<f64>) -> Result<Raster<f64>> {
    per_pixel_binary(a, b, |va, vb| {
        let sum = va + vb;
        if sum.abs() < DIV_EPS {
            f64::NAN
        } else {
            (va - vb) / sum
        }
    })
}

/// Ratio of two bands:
///
/// `a / b`
///
/// Unbounded. Pixels with a ~zero denominator, or with either input
/// undefined, are undefined in the output.
pub fn band_ratio(a: &Raster<f64>, b: &Raster<f64>) -> Result<Raster<f64>> {
    per_pixel_binary(a, b, |va, vb| {
        if vb.abs() < DIV_EPS {
            f64::NAN
        } else {
            va / vb
        }
    })
}

/// Derive {NDVI, NDSI, ROG} from a composite.
///
/// Each index is appended under its own name, then the output is cut down
/// to exactly the three index bands in that order.
pub fn spectral_indices(stack: &ImageStack, params: &IndexParams) -> Result<ImageStack> {
    let mut work = stack.clone();

    let ndvi = normalized_difference(work.require(&params.ndvi.0)?, work.require(&params.ndvi.1)?)?;
    work.push(NDVI, ndvi)?;

    let ndsi = normalized_difference(work.require(&params.ndsi.0)?, work.require(&params.ndsi.1)?)?;
    work.push(NDSI, ndsi)?;

    let rog = band_ratio(work.require(&params.rog.0)?, work.require(&params.rog.1)?)?;
    work.push(ROG, rog)?;

    work.select(&[NDVI, NDSI, ROG])
}

fn per_pixel_binary<F>(a: &Raster<f64>, b: &Raster<f64>, f: F) -> Result<Raster<f64>>
where
    F: Fn(f64, f64) -> f64 + Sync,
{
    if a.shape() != b.shape() {
        return Err(Error::SizeMismatch {
            er: a.rows(),
            ec: a.cols(),
            ar: b.rows(),
            ac: b.cols(),
        });
    }

    let (rows, cols) = a.shape();
    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let va = unsafe { a.get_unchecked(row, col) };
                let vb = unsafe { b.get_unchecked(row, col) };
                if a.is_nodata(va) || b.is_nodata(vb) {
                    continue;
                }
                row_data[col] = f(va, vb);
            }
            row_data
        })
        .collect();

    let mut out = a.with_same_meta::<f64>(rows, cols);
    out.set_nodata(Some(f64::NAN));
    *out.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(value: f64) -> Raster<f64> {
        let mut r = Raster::filled(4, 4, value);
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn normalized_difference_value() {
        let result = normalized_difference(&band(0.8), &band(0.2)).unwrap();
        // (0.8 - 0.2) / (0.8 + 0.2) = 0.6
        assert!((result.get(1, 1).unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn normalized_difference_is_antisymmetric() {
        let a = band(0.7);
        let b = band(0.3);
        let fwd = normalized_difference(&a, &b).unwrap();
        let rev = normalized_difference(&b, &a).unwrap();
        assert!((fwd.get(2, 2).unwrap() + rev.get(2, 2).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn zero_sum_is_undefined_both_ways() {
        let a = band(0.5);
        let b = band(-0.5);
        let fwd = normalized_difference(&a, &b).unwrap();
        let rev = normalized_difference(&b, &a).unwrap();
        assert!(fwd.get(0, 0).unwrap().is_nan());
        assert!(rev.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn ratio_value_and_zero_denominator() {
        let result = band_ratio(&band(0.6), &band(0.2)).unwrap();
        assert!((result.get(0, 0).unwrap() - 3.0).abs() < 1e-12);

        let zero_den = band_ratio(&band(0.6), &band(0.0)).unwrap();
        assert!(zero_den.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn ratio_is_unbounded() {
        let result = band_ratio(&band(100.0), &band(0.001)).unwrap();
        assert!(result.get(0, 0).unwrap() > 1.0);
    }

    #[test]
    fn undefined_inputs_propagate() {
        let mut a = band(0.8);
        a.set(3, 3, f64::NAN).unwrap();
        let result = normalized_difference(&a, &band(0.2)).unwrap();
        assert!(result.get(3, 3).unwrap().is_nan());
        assert!(!result.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn engine_outputs_exactly_three_index_bands() {
        let stack = ImageStack::from_bands([
            ("nir".to_string(), band(0.6)),
            ("red".to_string(), band(0.2)),
            ("green".to_string(), band(0.3)),
            ("elevation".to_string(), band(2000.0)),
            ("slope".to_string(), band(25.0)),
        ])
        .unwrap();

        let indices = spectral_indices(&stack, &IndexParams::default()).unwrap();
        assert_eq!(indices.schema(), vec![NDVI, NDSI, ROG]);

        // NDVI = (0.6 - 0.2) / 0.8; NDSI = (0.3 - 0.2) / 0.5; ROG = 0.2 / 0.3
        assert!((indices.band(NDVI).unwrap().get(0, 0).unwrap() - 0.5).abs() < 1e-12);
        assert!((indices.band(NDSI).unwrap().get(0, 0).unwrap() - 0.2).abs() < 1e-12);
        assert!(
            (indices.band(ROG).unwrap().get(0, 0).unwrap() - 0.2 / 0.3).abs() < 1e-12
        );
    }

    #[test]
    fn missing_input_band_fails() {
        let stack = ImageStack::from_bands([("nir".to_string(), band(0.6))]).unwrap();
        assert!(matches!(
            spectral_indices(&stack, &IndexParams::default()),
            Err(Error::BandNotFound(_))
        ));
    }
}
