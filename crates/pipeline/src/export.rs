//! Export hand-off
//!
//! Prepares finished rasters for the persistence collaborator: clip to an
//! output region, nearest-neighbor resample to the requested pixel size,
//! enforce the maximum-pixel safety bound, then write per-band GeoTIFFs
//! through core I/O. Fire-and-forget from the pipeline's perspective.

use landslip_core::io::write_geotiff;
use landslip_core::{Bounds, Error, ImageStack, Raster, RasterElement, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters for raster export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    /// Output resolution in transform units per pixel
    pub pixel_size: f64,
    /// Refuse to write anything larger than this many pixels
    pub max_pixels: u64,
    /// Output region; the full raster when absent
    pub region: Option<Bounds>,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            pixel_size: 30.0,
            max_pixels: 10_u64.pow(13),
            region: None,
        }
    }
}

/// Clip, resample and write one raster as a GeoTIFF.
pub fn export_raster<T, P>(raster: &Raster<T>, path: P, params: &ExportParams) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let prepared = prepare(raster, params)?;
    write_geotiff(&prepared, path)
}

/// Export every band of a stack as `<stem>_<band>.tif` under `dir`.
pub fn export_stack(
    stack: &ImageStack,
    dir: &Path,
    stem: &str,
    params: &ExportParams,
) -> Result<()> {
    for (name, band) in stack.iter() {
        let path = dir.join(format!("{}_{}.tif", stem, name));
        export_raster(band, path, params)?;
    }
    Ok(())
}

/// Apply region clip, resampling and the pixel-count bound.
fn prepare<T: RasterElement>(raster: &Raster<T>, params: &ExportParams) -> Result<Raster<T>> {
    if params.pixel_size <= 0.0 {
        return Err(Error::InvalidParameter {
            name: "pixel_size",
            value: params.pixel_size.to_string(),
            reason: "must be positive".into(),
        });
    }

    let clipped = match &params.region {
        Some(bounds) => clip(raster, bounds)?,
        None => raster.clone(),
    };

    let resampled = if (clipped.cell_size() - params.pixel_size).abs() < 1e-12 {
        clipped
    } else {
        resample_nearest(&clipped, params.pixel_size)?
    };

    let pixels = resampled.len() as u64;
    if pixels > params.max_pixels {
        return Err(Error::InvalidParameter {
            name: "max_pixels",
            value: params.max_pixels.to_string(),
            reason: format!("output would have {} pixels", pixels),
        });
    }

    Ok(resampled)
}

/// Cut the sub-grid covering `bounds`.
fn clip<T: RasterElement>(raster: &Raster<T>, bounds: &Bounds) -> Result<Raster<T>> {
    let (rows, cols) = raster.shape();
    let (row0, row1, col0, col1) = bounds
        .to_pixel_window(raster.transform(), rows, cols)
        .ok_or_else(|| Error::InvalidParameter {
            name: "region",
            value: format!("{:?}", bounds),
            reason: "does not intersect the raster".into(),
        })?;

    let (out_rows, out_cols) = (row1 - row0, col1 - col0);
    let mut out = raster.with_same_meta::<T>(out_rows, out_cols);
    out.set_nodata(raster.nodata());

    let mut transform = *raster.transform();
    let (ox, oy) = raster.transform().pixel_to_geo_corner(col0, row0);
    transform.origin_x = ox;
    transform.origin_y = oy;
    out.set_transform(transform);

    for row in 0..out_rows {
        for col in 0..out_cols {
            let v = unsafe { raster.get_unchecked(row0 + row, col0 + col) };
            out.set(row, col, v)?;
        }
    }
    Ok(out)
}

/// Nearest-neighbor resample to a new pixel size over the same extent.
fn resample_nearest<T: RasterElement>(raster: &Raster<T>, pixel_size: f64) -> Result<Raster<T>> {
    let (rows, cols) = raster.shape();
    let (min_x, min_y, max_x, max_y) = raster.bounds();

    let out_cols = ((max_x - min_x) / pixel_size).ceil().max(1.0) as usize;
    let out_rows = ((max_y - min_y) / pixel_size).ceil().max(1.0) as usize;

    let mut transform = *raster.transform();
    transform.pixel_width = pixel_size;
    transform.pixel_height = -pixel_size;

    let nodata = raster.nodata().unwrap_or_else(T::default_nodata);
    let mut out = raster.with_same_meta::<T>(out_rows, out_cols);
    out.set_transform(transform);
    out.set_nodata(Some(nodata));

    for row in 0..out_rows {
        for col in 0..out_cols {
            let (x, y) = transform.pixel_to_geo(col, row);
            let (src_col, src_row) = raster.transform().geo_to_pixel(x, y);
            let (sr, sc) = (src_row.floor(), src_col.floor());
            let v = if sr >= 0.0 && sc >= 0.0 && (sr as usize) < rows && (sc as usize) < cols {
                unsafe { raster.get_unchecked(sr as usize, sc as usize) }
            } else {
                nodata
            };
            out.set(row, col, v)?;
        }
    }
    Ok(out)
}
