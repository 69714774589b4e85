//! Named band stacks
//!
//! An [`ImageStack`] is an ordered set of uniquely named `f64` bands sharing
//! one grid. Composites, index images and change images are all stacks; the
//! schema checks here are what turn band mix-ups into immediate errors
//! instead of silently misaligned output.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};

/// An ordered collection of named, grid-aligned bands.
#[derive(Debug, Clone, Default)]
pub struct ImageStack {
    bands: Vec<(String, Raster<f64>)>,
}

impl ImageStack {
    pub fn new() -> Self {
        Self { bands: Vec::new() }
    }

    /// Build a stack from (name, band) pairs, validating alignment and
    /// name uniqueness
    pub fn from_bands<I>(bands: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Raster<f64>)>,
    {
        let mut stack = Self::new();
        for (name, band) in bands {
            stack.push(name, band)?;
        }
        Ok(stack)
    }

    /// Append a band.
    ///
    /// Fails with [`Error::DuplicateBand`] if the name is taken, or
    /// [`Error::SizeMismatch`] if the band's grid disagrees with the stack's.
    pub fn push(&mut self, name: impl Into<String>, band: Raster<f64>) -> Result<()> {
        let name = name.into();
        if self.band(&name).is_some() {
            return Err(Error::DuplicateBand(name));
        }
        if let Some((rows, cols)) = self.shape() {
            if band.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: band.rows(),
                    ac: band.cols(),
                });
            }
        }
        self.bands.push((name, band));
        Ok(())
    }

    /// Look up a band by name
    pub fn band(&self, name: &str) -> Option<&Raster<f64>> {
        self.bands
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, band)| band)
    }

    /// Look up a band by name, failing if absent
    pub fn require(&self, name: &str) -> Result<&Raster<f64>> {
        self.band(name)
            .ok_or_else(|| Error::BandNotFound(name.to_string()))
    }

    /// Band names in stack order
    pub fn schema(&self) -> Vec<String> {
        self.bands.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Grid dimensions, `None` for an empty stack
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.first().map(|(_, band)| band.shape())
    }

    /// Shared geotransform, `None` for an empty stack
    pub fn transform(&self) -> Option<&GeoTransform> {
        self.bands.first().map(|(_, band)| band.transform())
    }

    /// New stack keeping exactly the named bands, in the given order.
    ///
    /// Any missing name is a schema violation.
    pub fn select(&self, names: &[&str]) -> Result<ImageStack> {
        let mut out = ImageStack::new();
        for &name in names {
            let band = self.band(name).ok_or_else(|| Error::SchemaMismatch {
                expected: names.iter().map(|s| s.to_string()).collect(),
                actual: self.schema(),
            })?;
            out.push(name, band.clone())?;
        }
        Ok(out)
    }

    /// Fail unless `other` has exactly this stack's band names, in order
    pub fn ensure_same_schema(&self, other: &ImageStack) -> Result<()> {
        let mine = self.schema();
        let theirs = other.schema();
        if mine != theirs {
            return Err(Error::SchemaMismatch {
                expected: mine,
                actual: theirs,
            });
        }
        Ok(())
    }

    /// Iterate bands in stack order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Raster<f64>)> {
        self.bands.iter().map(|(n, band)| (n.as_str(), band))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(rows: usize, cols: usize, value: f64) -> Raster<f64> {
        let mut r = Raster::filled(rows, cols, value);
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn push_and_lookup() {
        let mut stack = ImageStack::new();
        stack.push("red", band(4, 4, 0.2)).unwrap();
        stack.push("nir", band(4, 4, 0.6)).unwrap();

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.schema(), vec!["red", "nir"]);
        assert_eq!(stack.band("nir").unwrap().get(0, 0).unwrap(), 0.6);
        assert!(stack.band("green").is_none());
        assert!(matches!(
            stack.require("green"),
            Err(Error::BandNotFound(_))
        ));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut stack = ImageStack::new();
        stack.push("red", band(4, 4, 0.2)).unwrap();
        assert!(matches!(
            stack.push("red", band(4, 4, 0.3)),
            Err(Error::DuplicateBand(_))
        ));
    }

    #[test]
    fn misaligned_band_rejected() {
        let mut stack = ImageStack::new();
        stack.push("red", band(4, 4, 0.2)).unwrap();
        assert!(matches!(
            stack.push("nir", band(4, 5, 0.6)),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn select_keeps_requested_order() {
        let stack = ImageStack::from_bands([
            ("a".to_string(), band(2, 2, 1.0)),
            ("b".to_string(), band(2, 2, 2.0)),
            ("c".to_string(), band(2, 2, 3.0)),
        ])
        .unwrap();

        let picked = stack.select(&["c", "a"]).unwrap();
        assert_eq!(picked.schema(), vec!["c", "a"]);

        assert!(matches!(
            stack.select(&["a", "missing"]),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn schema_comparison() {
        let a = ImageStack::from_bands([("x".to_string(), band(2, 2, 0.0))]).unwrap();
        let b = ImageStack::from_bands([("y".to_string(), band(2, 2, 0.0))]).unwrap();
        assert!(a.ensure_same_schema(&a.clone()).is_ok());
        assert!(a.ensure_same_schema(&b).is_err());
    }
}
