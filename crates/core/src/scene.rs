//! Scene data model and the imagery-store seam
//!
//! A [`Scene`] is one satellite acquisition: reflectance bands plus a packed
//! quality bitmask and a date. A [`SceneCollection`] is a time-ordered set of
//! scenes sharing a grid and band schema, built against a [`SceneFilter`].
//! The [`SceneStore`] trait is the boundary to whatever actually serves
//! imagery and elevation; the pipeline never talks to storage directly.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use crate::stack::ImageStack;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Axis-aligned geographic bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        if min_x > max_x || min_y > max_y {
            return Err(Error::InvalidParameter {
                name: "bounds",
                value: format!("({}, {}, {}, {})", min_x, min_y, max_x, max_y),
                reason: "min corner must not exceed max corner".into(),
            });
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Clamped half-open pixel window (row0, row1, col0, col1) covering this
    /// box on a north-up grid, or `None` if there is no overlap.
    pub fn to_pixel_window(
        &self,
        transform: &GeoTransform,
        rows: usize,
        cols: usize,
    ) -> Option<(usize, usize, usize, usize)> {
        // Top-left and bottom-right corners in fractional pixel space
        let (c0, r0) = transform.geo_to_pixel(self.min_x, self.max_y);
        let (c1, r1) = transform.geo_to_pixel(self.max_x, self.min_y);

        let row0 = r0.floor().max(0.0) as usize;
        let row1 = (r1.ceil().max(0.0) as usize).min(rows);
        let col0 = c0.floor().max(0.0) as usize;
        let col1 = (c1.ceil().max(0.0) as usize).min(cols);

        (row0 < row1 && col0 < col1).then_some((row0, row1, col0, col1))
    }
}

/// Closed date interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateInterval {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidParameter {
                name: "interval",
                value: format!("{}..{}", start, end),
                reason: "start must not be after end".into(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Smallest interval covering both inputs
    pub fn span(&self, other: &DateInterval) -> DateInterval {
        DateInterval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Predicates a [`SceneCollection`] was built with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFilter {
    /// Spatial region of interest
    pub bounds: Bounds,
    /// Acquisition date range
    pub dates: DateInterval,
    /// Maximum scene-level cloud cover percentage
    pub max_cloud_cover: f64,
}

/// One satellite acquisition: reflectance bands, QA bitmask, date.
///
/// Immutable once constructed; masking produces a new scene.
#[derive(Debug, Clone)]
pub struct Scene {
    bands: ImageStack,
    qa: Raster<u16>,
    acquired: NaiveDate,
    cloud_cover: f64,
}

impl Scene {
    /// Build a scene, validating that the QA band shares the bands' grid
    pub fn new(
        bands: ImageStack,
        qa: Raster<u16>,
        acquired: NaiveDate,
        cloud_cover: f64,
    ) -> Result<Self> {
        let (rows, cols) = bands.shape().ok_or_else(|| {
            Error::Algorithm("a scene needs at least one reflectance band".into())
        })?;
        if qa.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: qa.rows(),
                ac: qa.cols(),
            });
        }
        Ok(Self {
            bands,
            qa,
            acquired,
            cloud_cover,
        })
    }

    pub fn bands(&self) -> &ImageStack {
        &self.bands
    }

    pub fn qa(&self) -> &Raster<u16> {
        &self.qa
    }

    pub fn acquired(&self) -> NaiveDate {
        self.acquired
    }

    pub fn cloud_cover(&self) -> f64 {
        self.cloud_cover
    }
}

/// A time-ordered set of scenes on a shared grid and band schema.
///
/// Every member satisfies the filter the collection was built with. The
/// grid metadata is carried separately from the scenes so that an empty
/// collection can still describe the composite it would produce (fully
/// undefined, not an error).
#[derive(Debug, Clone)]
pub struct SceneCollection {
    scenes: Vec<Scene>,
    schema: Vec<String>,
    rows: usize,
    cols: usize,
    transform: GeoTransform,
    filter: SceneFilter,
}

impl SceneCollection {
    /// Build a collection from scenes, sorting by acquisition date and
    /// validating the filter invariant and grid/schema agreement.
    pub fn from_scenes(mut scenes: Vec<Scene>, filter: SceneFilter) -> Result<Self> {
        let first = scenes.first().ok_or_else(|| {
            Error::Algorithm(
                "cannot derive grid metadata from zero scenes; use SceneCollection::empty".into(),
            )
        })?;

        let schema = first.bands().schema();
        let (rows, cols) = first.bands().shape().expect("scene bands are non-empty");
        let transform = *first.bands().transform().expect("scene bands are non-empty");

        for scene in &scenes {
            if scene.bands().schema() != schema {
                return Err(Error::SchemaMismatch {
                    expected: schema.clone(),
                    actual: scene.bands().schema(),
                });
            }
            let (r, c) = scene.bands().shape().expect("validated non-empty");
            if (r, c) != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: r,
                    ac: c,
                });
            }
            if !filter.dates.contains(scene.acquired()) {
                return Err(Error::InvalidParameter {
                    name: "scenes",
                    value: scene.acquired().to_string(),
                    reason: "acquisition date outside the collection's filter".into(),
                });
            }
            if scene.cloud_cover() > filter.max_cloud_cover {
                return Err(Error::InvalidParameter {
                    name: "scenes",
                    value: format!("{:.1}% cloud cover", scene.cloud_cover()),
                    reason: format!(
                        "exceeds the collection's {:.1}% threshold",
                        filter.max_cloud_cover
                    ),
                });
            }
            let (_, first_band) = scene.bands().iter().next().expect("validated non-empty");
            let (bx0, by0, bx1, by1) = first_band.bounds();
            let scene_bounds = Bounds::new(bx0, by0, bx1, by1)?;
            if !scene_bounds.intersects(&filter.bounds) {
                return Err(Error::InvalidParameter {
                    name: "scenes",
                    value: scene.acquired().to_string(),
                    reason: "scene does not intersect the collection's bounds".into(),
                });
            }
        }

        scenes.sort_by_key(Scene::acquired);

        Ok(Self {
            scenes,
            schema,
            rows,
            cols,
            transform,
            filter,
        })
    }

    /// An empty collection with explicit grid metadata.
    ///
    /// Compositing it yields a fully undefined image.
    pub fn empty(
        schema: Vec<String>,
        rows: usize,
        cols: usize,
        transform: GeoTransform,
        filter: SceneFilter,
    ) -> Self {
        Self {
            scenes: Vec::new(),
            schema,
            rows,
            cols,
            transform,
            filter,
        }
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Members whose acquisition date falls inside the closed interval
    pub fn scenes_within(&self, interval: &DateInterval) -> Vec<&Scene> {
        self.scenes
            .iter()
            .filter(|s| interval.contains(s.acquired()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn filter(&self) -> &SceneFilter {
        &self.filter
    }
}

/// The external imagery and elevation collaborator.
///
/// Implementations materialize scenes matching a filter onto a shared grid
/// and serve the elevation model for a region. Anything with these
/// semantics works: a directory of GeoTIFFs, a tile service, or synthetic
/// fixtures in tests.
pub trait SceneStore {
    /// Scenes matching the filter, grid-aligned and time-ordered
    fn scenes(&self, filter: &SceneFilter) -> Result<SceneCollection>;

    /// The elevation raster covering a region
    fn elevation(&self, bounds: &Bounds) -> Result<Raster<f64>>;
}
