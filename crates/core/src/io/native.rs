//! Native GeoTIFF reading/writing
//!
//! Built on the `tiff` crate. Reads single-band grayscale TIFFs of the
//! common sample formats and recovers the geotransform from the
//! ModelPixelScale + ModelTiepoint tags; writes 32-bit float samples with
//! the same tags plus a minimal GeoKey directory.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Read a single-band GeoTIFF into a raster.
///
/// Samples are cast into `T`; values that do not fit become `T`'s default
/// nodata.
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    let mut decoder =
        Decoder::new(file).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("cannot read TIFF dimensions: {}", e)))?;
    let (rows, cols) = (height as usize, width as usize);

    let image = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("cannot read TIFF data: {}", e)))?;

    let data: Vec<T> = match image {
        DecodingResult::U8(buf) => cast_buffer(&buf),
        DecodingResult::U16(buf) => cast_buffer(&buf),
        DecodingResult::U32(buf) => cast_buffer(&buf),
        DecodingResult::I16(buf) => cast_buffer(&buf),
        DecodingResult::I32(buf) => cast_buffer(&buf),
        DecodingResult::F32(buf) => cast_buffer(&buf),
        DecodingResult::F64(buf) => cast_buffer(&buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "unsupported TIFF sample format".into(),
            ))
        }
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_nodata(Some(T::default_nodata()));

    Ok(raster)
}

fn cast_buffer<S, T>(buf: &[S]) -> Vec<T>
where
    S: Copy + num_traits::NumCast,
    T: RasterElement,
{
    buf.iter()
        .map(|&v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

/// Recover the geotransform from ModelPixelScale + ModelTiepoint, if present
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z]; scale: [sx, sy, sz]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// Write a raster to a GeoTIFF file as 32-bit float samples
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut encoder = TiffEncoder::new(file)
        .map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();
    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    // GTModelTypeGeoKey = geographic, GTRasterTypeGeoKey = pixel-is-area
    let geokeys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 2, 1025, 0, 1, 1];

    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])
        .map_err(|e| Error::Other(format!("cannot write pixel-scale tag: {}", e)))?;
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(|e| Error::Other(format!("cannot write tiepoint tag: {}", e)))?;
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, &geokeys[..])
        .map_err(|e| Error::Other(format!("cannot write geokey tag: {}", e)))?;

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("cannot write TIFF data: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("landslip-io-{}-{}.tif", std::process::id(), name))
    }

    #[test]
    fn roundtrip_preserves_data_and_transform() {
        let mut raster: Raster<f64> = Raster::new(4, 5);
        raster.set_transform(GeoTransform::new(85.0, 28.5, 0.25, -0.25));
        raster.set_nodata(Some(f64::NAN));
        for row in 0..4 {
            for col in 0..5 {
                raster.set(row, col, (row * 5 + col) as f64).unwrap();
            }
        }
        raster.set(2, 2, f64::NAN).unwrap();

        let path = temp_path("roundtrip");
        write_geotiff(&raster, &path).unwrap();
        let back: Raster<f64> = read_geotiff(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.shape(), (4, 5));
        assert_eq!(back.get(1, 3).unwrap(), 8.0);
        assert!(back.get(2, 2).unwrap().is_nan());

        let gt = back.transform();
        assert!((gt.origin_x - 85.0).abs() < 1e-9);
        assert!((gt.origin_y - 28.5).abs() < 1e-9);
        assert!((gt.pixel_width - 0.25).abs() < 1e-9);
        assert!((gt.pixel_height + 0.25).abs() < 1e-9);
    }

    #[test]
    fn integer_rasters_survive_the_f32_sample_format() {
        let mut labels: Raster<i32> = Raster::filled(3, 3, 4);
        labels.set(0, 0, -1).unwrap();

        let path = temp_path("labels");
        write_geotiff(&labels, &path).unwrap();
        let back: Raster<i32> = read_geotiff(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.get(0, 0).unwrap(), -1);
        assert_eq!(back.get(2, 2).unwrap(), 4);
    }
}
