//! Change detection
//!
//! Band-by-band difference of two index stacks (post minus pre). Schemas
//! must agree exactly; a pixel undefined in either input is undefined in
//! the output. Differences are narrowed through f32, the sample width the
//! export path writes.

use landslip_core::{Error, ImageStack, Result};
use ndarray::Array2;
use rayon::prelude::*;

/// Compute the change image `post - pre`.
///
/// Fails fast with a schema error when the two stacks do not carry the
/// same bands; no partial output is produced.
pub fn change_image(pre: &ImageStack, post: &ImageStack) -> Result<ImageStack> {
    pre.ensure_same_schema(post)?;

    let (rows, cols) = match (pre.shape(), post.shape()) {
        (Some(a), Some(b)) if a == b => a,
        (Some((er, ec)), Some((ar, ac))) => {
            return Err(Error::SizeMismatch { er, ec, ar, ac })
        }
        _ => return Err(Error::Algorithm("cannot difference empty stacks".into())),
    };

    let mut change = ImageStack::new();
    for ((name, pre_band), (_, post_band)) in pre.iter().zip(post.iter()) {
        let data: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![f64::NAN; cols];
                for col in 0..cols {
                    let vp = unsafe { pre_band.get_unchecked(row, col) };
                    let va = unsafe { post_band.get_unchecked(row, col) };
                    if pre_band.is_nodata(vp) || post_band.is_nodata(va) {
                        continue;
                    }
                    row_data[col] = (va - vp) as f32 as f64;
                }
                row_data
            })
            .collect();

        let mut out = pre_band.with_same_meta::<f64>(rows, cols);
        out.set_nodata(Some(f64::NAN));
        *out.data_mut() =
            Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
        change.push(name, out)?;
    }

    Ok(change)
}
