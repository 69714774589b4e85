//! Raster I/O
//!
//! Native GeoTIFF support only; no GDAL linkage. Good enough for the
//! single-band, striped, north-up files this workspace produces and
//! consumes.

mod native;

pub use native::{read_geotiff, write_geotiff};
