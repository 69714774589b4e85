//! Temporal median compositing
//!
//! Reduces the scenes of a collection that fall inside a closed date
//! interval to one representative image: per band, per pixel, the median of
//! the defined observations. A pixel with no defined observation stays
//! undefined, and an interval with no scenes at all yields a fully
//! undefined composite rather than an error.

use landslip_core::{DateInterval, Error, ImageStack, Raster, Result, SceneCollection};
use ndarray::Array2;
use rayon::prelude::*;

/// Median-composite the scenes of `collection` within `interval`.
///
/// The output stack carries the collection's band schema and grid.
pub fn median_composite(
    collection: &SceneCollection,
    interval: &DateInterval,
) -> Result<ImageStack> {
    let contributing = collection.scenes_within(interval);
    let (rows, cols) = collection.shape();

    let mut composite = ImageStack::new();
    for name in collection.schema() {
        let bands: Vec<&Raster<f64>> = contributing
            .iter()
            .map(|scene| scene.bands().require(name))
            .collect::<Result<Vec<_>>>()?;

        let data: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![f64::NAN; cols];
                let mut values = Vec::with_capacity(bands.len());
                for col in 0..cols {
                    values.clear();
                    for band in &bands {
                        let v = unsafe { band.get_unchecked(row, col) };
                        if !band.is_nodata(v) {
                            values.push(v);
                        }
                    }
                    if !values.is_empty() {
                        row_data[col] = median_in_place(&mut values);
                    }
                }
                row_data
            })
            .collect();

        let mut out: Raster<f64> = Raster::from_vec(data, rows, cols)?;
        out.set_transform(*collection.transform());
        out.set_nodata(Some(f64::NAN));
        if let Some(crs) = contributing
            .first()
            .and_then(|s| s.bands().band(name))
            .and_then(Raster::crs)
        {
            out.set_crs(Some(crs.clone()));
        }
        composite.push(name.clone(), out)?;
    }

    if composite.is_empty() {
        return Err(Error::Algorithm(
            "collection has an empty band schema".into(),
        ));
    }

    Ok(composite)
}

/// Median of a non-empty slice; sorts in place. Even counts average the two
/// middle values.
fn median_in_place(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
