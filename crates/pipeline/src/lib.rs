//! # landslip-pipeline
//!
//! Change-detection and unsupervised segmentation of coseismic landslide
//! zones from multispectral composites.
//!
//! Stage modules, leaf-first:
//!
//! - **masking**: QA bitmask cloud/shadow filter
//! - **composite**: temporal median compositor
//! - **terrain**: Horn slope, relief mask, elevation/slope band append
//! - **indices**: NDVI / NDSI / ROG derivation
//! - **change**: post-minus-pre differencing
//! - **cluster**: sampling, K-means fit, per-pixel labeling
//!
//! `pipeline::run` wires the stages into the full pre/post flow and
//! `export` hands finished rasters to the persistence collaborator.
//!
//! Every stage evaluates eagerly: a call returns fully materialized
//! rasters, never a deferred expression graph. Stages parallelize over
//! rows internally but are pure functions of their inputs.

pub mod change;
pub mod cluster;
pub mod composite;
pub mod export;
pub mod indices;
pub mod masking;
pub mod pipeline;
pub mod terrain;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::change::change_image;
    pub use crate::cluster::{
        classify, sample_stack, KmeansModel, KmeansParams, SamplingParams, UNLABELED,
    };
    pub use crate::composite::median_composite;
    pub use crate::export::{export_raster, export_stack, ExportParams};
    pub use crate::indices::{
        band_ratio, normalized_difference, spectral_indices, IndexParams, NDSI, NDVI, ROG,
    };
    pub use crate::masking::{mask_clouds, mask_collection, CloudMaskParams};
    pub use crate::pipeline::{run, PipelineOutput, PipelineParams};
    pub use crate::terrain::{
        augment_with_terrain, masked_slope, slope, SlopeUnits, TerrainParams, ELEVATION_BAND,
        SLOPE_BAND,
    };
    pub use landslip_core::prelude::*;
}
