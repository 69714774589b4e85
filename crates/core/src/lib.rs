//! # landslip-core
//!
//! Core types for the landslip change-detection workspace:
//!
//! - [`Raster<T>`]: generic georeferenced raster grid
//! - [`ImageStack`]: named, grid-aligned band stacks
//! - [`Scene`] / [`SceneCollection`]: the satellite acquisition model and
//!   the [`SceneStore`] seam to the imagery platform
//! - Native GeoTIFF I/O in [`io`]

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod scene;
pub mod stack;

pub use crs::Crs;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement, RasterStatistics};
pub use scene::{Bounds, DateInterval, Scene, SceneCollection, SceneFilter, SceneStore};
pub use stack::ImageStack;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::scene::{Bounds, DateInterval, Scene, SceneCollection, SceneFilter, SceneStore};
    pub use crate::stack::ImageStack;
}
