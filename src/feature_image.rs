use ndarray::ArrayD;
use smallvec::smallvec;

use crate::{Error, Result, ShortVec};

/// Scalar image with physical geometry.
///
/// Array axis `a` corresponds to physical coordinate `a`;
/// voxel `i` along that axis is centred at `origin[a] + i * spacing[a]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureImage {
    data: ArrayD<f64>,
    origin: ShortVec<f64>,
    spacing: ShortVec<f64>,
}

impl FeatureImage {
    pub fn try_new(data: ArrayD<f64>, origin: &[f64], spacing: &[f64]) -> Result<Self> {
        let ndim = data.ndim();
        for len in [origin.len(), spacing.len()] {
            if len != ndim {
                return Err(Error::DimensionMismatch {
                    expected: ndim,
                    got: len,
                });
            }
        }
        if data.is_empty() {
            return Err(Error::InvalidGeometry("image must not be empty".into()));
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(Error::InvalidGeometry("image origin must be finite".into()));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::InvalidGeometry(
                "image spacing must be finite and positive".into(),
            ));
        }
        Ok(Self {
            data,
            origin: origin.iter().copied().collect(),
            spacing: spacing.iter().copied().collect(),
        })
    }

    /// Image with zero origin and unit spacing, so that physical and index coordinates coincide.
    pub fn from_array(data: ArrayD<f64>) -> Result<Self> {
        let ndim = data.ndim();
        Self::try_new(data, &vec![0.0; ndim], &vec![1.0; ndim])
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn origin(&self) -> &[f64] {
        &self.origin
    }

    pub fn spacing(&self) -> &[f64] {
        &self.spacing
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn get(&self, idx: &[usize]) -> Option<f64> {
        self.data.get(idx).copied()
    }

    /// Continuous voxel index of a physical point.
    pub fn continuous_index(&self, pt: &[f64]) -> ShortVec<f64> {
        let mut out = smallvec![f64::NAN; self.ndim()];
        for ((o, p), (origin, spacing)) in out
            .iter_mut()
            .zip(pt.iter())
            .zip(self.origin.iter().zip(self.spacing.iter()))
        {
            *o = (p - origin) / spacing;
        }
        out
    }

    /// Whether a continuous index lies within the half-voxel-padded image extent,
    /// `[-0.5, size - 0.5)` on every axis.
    pub fn is_inside(&self, cidx: &[f64]) -> bool {
        cidx.len() == self.ndim()
            && cidx
                .iter()
                .zip(self.shape().iter())
                .all(|(c, s)| *c >= -0.5 && *c < *s as f64 - 0.5)
    }
}

#[cfg(feature = "image")]
impl FeatureImage {
    /// 2D feature image of the luminance of an image, with axes `[y, x]`.
    ///
    /// Values are normalised to `[0, 1]`.
    pub fn from_luma(image: &::image::DynamicImage) -> Result<Self> {
        let luma = image.to_luma32f();
        let (w, h) = luma.dimensions();
        let data = ArrayD::from_shape_fn(ndarray::IxDyn(&[h as usize, w as usize]), |idx| {
            luma.get_pixel(idx[1] as u32, idx[0] as u32).0[0] as f64
        });
        Self::from_array(data)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::FeatureImage;
    use crate::Error;

    fn make_image() -> FeatureImage {
        let data = ArrayD::from_shape_fn(IxDyn(&[4, 5]), |idx| (idx[0] * 10 + idx[1]) as f64);
        FeatureImage::try_new(data, &[10.0, -5.0], &[2.0, 0.5]).unwrap()
    }

    #[test]
    fn test_continuous_index() {
        let im = make_image();
        let cidx = im.continuous_index(&[13.0, -4.0]);
        assert_eq!(cidx.as_slice(), &[1.5, 2.0]);
        assert_eq!(im.get(&[1, 2]), Some(12.0));
        assert_eq!(im.get(&[4, 0]), None);
    }

    #[test]
    fn test_is_inside() {
        let im = make_image();
        assert!(im.is_inside(&[-0.5, 0.0]));
        assert!(im.is_inside(&[3.49, 4.49]));
        assert!(!im.is_inside(&[3.5, 0.0]));
        assert!(!im.is_inside(&[0.0, -0.51]));
        assert!(!im.is_inside(&[f64::NAN, 0.0]));
        assert!(!im.is_inside(&[0.0]));
    }

    #[test]
    fn test_validation() {
        let data = ArrayD::zeros(IxDyn(&[3, 3]));
        assert!(matches!(
            FeatureImage::try_new(data.clone(), &[0.0], &[1.0, 1.0]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(FeatureImage::try_new(data.clone(), &[0.0, 0.0], &[1.0, 0.0]).is_err());
        assert!(FeatureImage::try_new(data, &[f64::NAN, 0.0], &[1.0, 1.0]).is_err());
        assert!(FeatureImage::from_array(ArrayD::zeros(IxDyn(&[0, 3]))).is_err());
    }
}
