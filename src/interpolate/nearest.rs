use std::sync::Arc;

use smallvec::smallvec;

use super::{Interpolator, clamp_index, inside_index};
use crate::{FeatureImage, ShortVec};

/// Value of the voxel nearest to the point; ties round to even indices.
#[derive(Debug, Clone)]
pub struct NearestNeighbourInterpolator {
    image: Arc<FeatureImage>,
}

impl NearestNeighbourInterpolator {
    pub fn new(image: Arc<FeatureImage>) -> Self {
        Self { image }
    }
}

impl Interpolator for NearestNeighbourInterpolator {
    fn image(&self) -> &Arc<FeatureImage> {
        &self.image
    }

    fn evaluate(&self, pt: &[f64]) -> Option<f64> {
        let cidx = inside_index(&self.image, pt)?;
        let mut idx: ShortVec<usize> = smallvec![0; cidx.len()];
        for ((i, c), size) in idx.iter_mut().zip(cidx.iter()).zip(self.image.shape()) {
            *i = clamp_index(c.round_ties_even() as isize, *size);
        }
        self.image.get(&idx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::NearestNeighbourInterpolator;
    use crate::Interpolator;
    use crate::interpolate::test_images;

    #[test]
    fn test_nearest() {
        let interp = NearestNeighbourInterpolator::new(test_images::linear_2d());
        assert_eq!(interp.evaluate(&[2.0, 3.0]), Some(1.0 + 4.0 - 9.0));
        assert_eq!(interp.evaluate(&[2.4, 2.6]), Some(1.0 + 4.0 - 9.0));
        assert_eq!(interp.evaluate(&[2.5, 0.0]), Some(1.0 + 4.0));
        assert_eq!(interp.evaluate(&[3.5, 0.0]), Some(1.0 + 8.0));
        assert_eq!(interp.evaluate(&[-0.5, 0.0]), Some(1.0));
    }

    #[test]
    fn test_outside() {
        let interp = NearestNeighbourInterpolator::new(test_images::linear_2d());
        assert_eq!(interp.evaluate(&[5.5, 0.0]), None);
        assert_eq!(interp.evaluate(&[0.0, -0.6]), None);
        assert_eq!(interp.evaluate(&[f64::NAN, 0.0]), None);
        assert!(Arc::new(interp).continuous_derivative().is_none());
    }
}
