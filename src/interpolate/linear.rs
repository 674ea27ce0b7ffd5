use std::sync::Arc;

use smallvec::smallvec;

use super::{Interpolator, clamp_index, inside_index};
use crate::{FeatureImage, ShortVec};

/// Multilinear interpolation between the `2^ndim` voxels surrounding the point.
///
/// Within half a voxel of the border, the border value is extended.
#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    image: Arc<FeatureImage>,
}

impl LinearInterpolator {
    pub fn new(image: Arc<FeatureImage>) -> Self {
        Self { image }
    }
}

impl Interpolator for LinearInterpolator {
    fn image(&self) -> &Arc<FeatureImage> {
        &self.image
    }

    fn evaluate(&self, pt: &[f64]) -> Option<f64> {
        let cidx = inside_index(&self.image, pt)?;
        let ndim = cidx.len();
        let shape = self.image.shape();
        let base: ShortVec<isize> = cidx.iter().map(|c| c.floor() as isize).collect();
        let frac: ShortVec<f64> = cidx
            .iter()
            .zip(base.iter())
            .map(|(c, b)| c - *b as f64)
            .collect();

        let mut idx: ShortVec<usize> = smallvec![0; ndim];
        let mut value = 0.0;
        for corner in 0..(1usize << ndim) {
            let mut weight = 1.0;
            for a in 0..ndim {
                let upper = (corner >> a) & 1 == 1;
                idx[a] = clamp_index(base[a] + upper as isize, shape[a]);
                weight *= if upper { frac[a] } else { 1.0 - frac[a] };
            }
            if weight != 0.0 {
                value += weight * self.image.get(&idx)?;
            }
        }
        Some(value)
    }
}
