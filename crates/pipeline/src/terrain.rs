//! Topographic augmentation
//!
//! Slope from a DEM via Horn's (1981) 3x3 method, a relief mask that drops
//! low-slope pixels, and the step that appends elevation and masked slope
//! as extra bands on a composite.

use landslip_core::{Error, ImageStack, Raster, Result};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Band name for appended elevation
pub const ELEVATION_BAND: &str = "elevation";
/// Band name for appended slope
pub const SLOPE_BAND: &str = "slope";

/// Units for slope output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlopeUnits {
    /// Degrees (0-90)
    #[default]
    Degrees,
    /// Percent rise
    Percent,
    /// Radians (0-pi/2)
    Radians,
}

/// Parameters for slope derivation and the relief mask
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    /// Output units
    pub units: SlopeUnits,
    /// Horizontal unit conversion; ~111320 for lat/lon grids with metric
    /// elevations
    pub z_factor: f64,
    /// Slope pixels below this value (in `units`) are masked out
    pub slope_threshold: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            units: SlopeUnits::Degrees,
            z_factor: 1.0,
            slope_threshold: 10.0,
        }
    }
}

/// Calculate slope from a DEM.
///
/// Horn's method over the 3x3 neighborhood:
///
/// ```text
/// a b c
/// d e f
/// g h i
/// ```
///
/// dz/dx = ((c + 2f + i) - (a + 2d + g)) / (8 * cellsize)
/// dz/dy = ((g + 2h + i) - (a + 2b + c)) / (8 * cellsize)
///
/// Edge pixels and pixels with an undefined neighbor are undefined.
pub fn slope(dem: &Raster<f64>, params: &TerrainParams) -> Result<Raster<f64>> {
    if params.z_factor <= 0.0 {
        return Err(Error::InvalidParameter {
            name: "z_factor",
            value: params.z_factor.to_string(),
            reason: "must be positive".into(),
        });
    }

    let (rows, cols) = dem.shape();
    let run = 8.0 * dem.cell_size() * params.z_factor;

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            if row == 0 || row == rows - 1 {
                return row_data;
            }
            for col in 1..cols.saturating_sub(1) {
                let e = unsafe { dem.get_unchecked(row, col) };
                if dem.is_nodata(e) {
                    continue;
                }

                let a = unsafe { dem.get_unchecked(row - 1, col - 1) };
                let b = unsafe { dem.get_unchecked(row - 1, col) };
                let c = unsafe { dem.get_unchecked(row - 1, col + 1) };
                let d = unsafe { dem.get_unchecked(row, col - 1) };
                let f = unsafe { dem.get_unchecked(row, col + 1) };
                let g = unsafe { dem.get_unchecked(row + 1, col - 1) };
                let h = unsafe { dem.get_unchecked(row + 1, col) };
                let i = unsafe { dem.get_unchecked(row + 1, col + 1) };

                if [a, b, c, d, f, g, h, i].iter().any(|&v| dem.is_nodata(v)) {
                    continue;
                }

                let dz_dx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / run;
                let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / run;
                let rad = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan();

                row_data[col] = match params.units {
                    SlopeUnits::Degrees => rad.to_degrees(),
                    SlopeUnits::Percent => rad.tan() * 100.0,
                    SlopeUnits::Radians => rad,
                };
            }
            row_data
        })
        .collect();

    let mut out = dem.with_same_meta::<f64>(rows, cols);
    out.set_nodata(Some(f64::NAN));
    *out.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(out)
}

/// Slope with the relief mask applied: pixels below `slope_threshold`
/// become undefined.
pub fn masked_slope(dem: &Raster<f64>, params: &TerrainParams) -> Result<Raster<f64>> {
    let mut out = slope(dem, params)?;
    out.data_mut().mapv_inplace(|v| {
        if v < params.slope_threshold {
            f64::NAN
        } else {
            v
        }
    });
    Ok(out)
}

/// Append `elevation` and relief-masked `slope` bands to a composite.
///
/// The DEM must share the composite's grid.
pub fn augment_with_terrain(
    composite: &ImageStack,
    dem: &Raster<f64>,
    params: &TerrainParams,
) -> Result<ImageStack> {
    let (rows, cols) = composite.shape().ok_or_else(|| {
        Error::Algorithm("cannot augment an empty composite".into())
    })?;
    if dem.shape() != (rows, cols) {
        return Err(Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar: dem.rows(),
            ac: dem.cols(),
        });
    }
    if composite.transform() != Some(dem.transform()) {
        return Err(Error::Algorithm(
            "DEM and composite grids are not coordinate-aligned".into(),
        ));
    }

    // Elevation passes through unchanged, with NaN as its undefined marker
    let mut elevation = dem.clone();
    elevation.set_nodata(Some(f64::NAN));

    let mut out = composite.clone();
    out.push(ELEVATION_BAND, elevation)?;
    out.push(SLOPE_BAND, masked_slope(dem, params)?)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use landslip_core::GeoTransform;

    fn tilted_dem() -> Raster<f64> {
        // z = x + y: constant gradient everywhere
        let mut dem = Raster::new(10, 10);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        dem.set_nodata(Some(f64::NAN));
        for row in 0..10 {
            for col in 0..10 {
                dem.set(row, col, (row + col) as f64).unwrap();
            }
        }
        dem
    }

    #[test]
    fn flat_surface_has_zero_slope() {
        let mut dem: Raster<f64> = Raster::filled(10, 10, 500.0);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        dem.set_nodata(Some(f64::NAN));

        let result = slope(&dem, &TerrainParams::default()).unwrap();
        assert!(result.get(5, 5).unwrap().abs() < 1e-6);
    }

    #[test]
    fn constant_gradient_gives_uniform_slope() {
        let result = slope(&tilted_dem(), &TerrainParams::default()).unwrap();
        let a = result.get(3, 3).unwrap();
        let b = result.get(6, 6).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-12);
        // Gradient magnitude is sqrt(2), slope = atan(sqrt(2)) in degrees
        let expected = 2.0_f64.sqrt().atan().to_degrees();
        assert_relative_eq!(a, expected, epsilon = 1e-9);
    }

    #[test]
    fn edges_are_undefined() {
        let result = slope(&tilted_dem(), &TerrainParams::default()).unwrap();
        assert!(result.get(0, 5).unwrap().is_nan());
        assert!(result.get(5, 0).unwrap().is_nan());
        assert!(result.get(9, 9).unwrap().is_nan());
    }

    #[test]
    fn unit_conversions_agree() {
        let dem = tilted_dem();
        let deg = slope(&dem, &TerrainParams::default()).unwrap();
        let rad = slope(
            &dem,
            &TerrainParams {
                units: SlopeUnits::Radians,
                ..Default::default()
            },
        )
        .unwrap();
        let pct = slope(
            &dem,
            &TerrainParams {
                units: SlopeUnits::Percent,
                ..Default::default()
            },
        )
        .unwrap();

        let r = rad.get(5, 5).unwrap();
        assert!((deg.get(5, 5).unwrap() - r.to_degrees()).abs() < 1e-9);
        assert!((pct.get(5, 5).unwrap() - r.tan() * 100.0).abs() < 1e-9);
    }

    #[test]
    fn relief_mask_drops_gentle_slopes() {
        // atan(sqrt(2)) ~= 54.7 degrees; a threshold above that masks all
        let dem = tilted_dem();
        let below = masked_slope(
            &dem,
            &TerrainParams {
                slope_threshold: 60.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(below.get(5, 5).unwrap().is_nan());

        let above = masked_slope(
            &dem,
            &TerrainParams {
                slope_threshold: 10.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!above.get(5, 5).unwrap().is_nan());
    }

    #[test]
    fn augment_appends_two_bands() {
        let dem = tilted_dem();
        let mut band = Raster::filled(10, 10, 0.4);
        band.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        band.set_nodata(Some(f64::NAN));
        let composite = ImageStack::from_bands([("red".to_string(), band)]).unwrap();

        let augmented =
            augment_with_terrain(&composite, &dem, &TerrainParams::default()).unwrap();
        assert_eq!(augmented.schema(), vec!["red", ELEVATION_BAND, SLOPE_BAND]);
        assert_eq!(
            augmented.band(ELEVATION_BAND).unwrap().get(2, 3).unwrap(),
            5.0
        );
    }

    #[test]
    fn augment_rejects_misaligned_dem() {
        let dem = tilted_dem();
        let band = Raster::filled(4, 4, 0.4);
        let composite = ImageStack::from_bands([("red".to_string(), band)]).unwrap();
        assert!(matches!(
            augment_with_terrain(&composite, &dem, &TerrainParams::default()),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
