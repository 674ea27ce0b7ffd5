use std::sync::Arc;

use ndarray::ArrayD;
use smallvec::smallvec;

use super::{ContinuousDerivative, Interpolator, dispatch_decomposition, inside_index, mirror_index};
use crate::{
    FeatureImage, Result, ShortVec,
    kernel::{self, MAX_SPLINE_ORDER},
};

type Weights = ShortVec<[f64; MAX_SPLINE_ORDER + 1]>;

/// B-spline interpolation of order 1, 2 or 3 over precomputed coefficients,
/// with mirror-symmetric boundaries.
#[derive(Debug, Clone)]
pub struct BSplineInterpolator {
    image: Arc<FeatureImage>,
    order: usize,
    coefficients: ArrayD<f64>,
}

impl BSplineInterpolator {
    /// Compute coefficients for `image` and block until they are ready.
    ///
    /// To overlap the decompositions of several images,
    /// use [super::dispatch_decomposition] instead.
    pub fn new(image: Arc<FeatureImage>, order: u32) -> Result<Self> {
        dispatch_decomposition(image, order)?.wait()
    }

    pub(super) fn from_coefficients(
        image: Arc<FeatureImage>,
        order: u32,
        coefficients: ArrayD<f64>,
    ) -> Self {
        Self {
            image,
            order: order as usize,
            coefficients,
        }
    }

    pub fn order(&self) -> u32 {
        self.order as u32
    }

    pub fn coefficients(&self) -> &ArrayD<f64> {
        &self.coefficients
    }

    fn sample(&self, pt: &[f64], gradient: Option<&mut [f64]>) -> Option<f64> {
        let cidx = inside_index(&self.image, pt)?;
        let ndim = cidx.len();
        let order = self.order;
        let mut start: ShortVec<isize> = smallvec![0; ndim];
        let mut weights: Weights = smallvec![[0.0; MAX_SPLINE_ORDER + 1]; ndim];
        let mut derivatives: Weights = smallvec![[0.0; MAX_SPLINE_ORDER + 1]; ndim];
        for a in 0..ndim {
            start[a] = kernel::weights_into(order, cidx[a], &mut weights[a][..=order]);
            if gradient.is_some() {
                kernel::derivative_weights_into(order, cidx[a], &mut derivatives[a][..=order]);
            }
        }

        let shape = self.image.shape();
        let mut offsets: ShortVec<usize> = smallvec![0; ndim];
        let mut idx: ShortVec<usize> = smallvec![0; ndim];
        let mut value = 0.0;
        let mut grad: ShortVec<f64> = smallvec![0.0; ndim];
        for _ in 0..(order + 1).pow(ndim as u32) {
            for a in 0..ndim {
                idx[a] = mirror_index(start[a] + offsets[a] as isize, shape[a]);
            }
            let c = self.coefficients[&idx[..]];
            let w: f64 = (0..ndim).map(|a| weights[a][offsets[a]]).product();
            value += w * c;
            if gradient.is_some() {
                for (b, g) in grad.iter_mut().enumerate() {
                    let dw: f64 = (0..ndim)
                        .map(|a| {
                            if a == b {
                                derivatives[a][offsets[a]]
                            } else {
                                weights[a][offsets[a]]
                            }
                        })
                        .product();
                    *g += dw * c;
                }
            }
            for o in offsets.iter_mut() {
                *o += 1;
                if *o <= order {
                    break;
                }
                *o = 0;
            }
        }

        if let Some(out) = gradient {
            for ((o, g), s) in out.iter_mut().zip(grad.iter()).zip(self.image.spacing()) {
                *o = g / s;
            }
        }
        Some(value)
    }
}

impl Interpolator for BSplineInterpolator {
    fn image(&self) -> &Arc<FeatureImage> {
        &self.image
    }

    fn evaluate(&self, pt: &[f64]) -> Option<f64> {
        self.sample(pt, None)
    }

    fn continuous_derivative(self: Arc<Self>) -> Option<Arc<dyn ContinuousDerivative>> {
        Some(self)
    }
}

impl ContinuousDerivative for BSplineInterpolator {
    fn evaluate_with_gradient(&self, pt: &[f64], gradient: &mut [f64]) -> Option<f64> {
        self.sample(pt, Some(gradient))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{ArrayD, IxDyn};

    use super::BSplineInterpolator;
    use crate::interpolate::{LinearInterpolator, test_images};
    use crate::tests::FD_TOLERANCE;
    use crate::{ContinuousDerivative, FeatureImage, Interpolator};

    #[test]
    fn test_interpolates_samples() {
        let image = test_images::smooth_2d();
        for order in 1..=3 {
            let interp = BSplineInterpolator::new(image.clone(), order).unwrap();
            assert_eq!(interp.order(), order);
            for i in [0, 5, 23] {
                for j in [0, 7, 19] {
                    let pt = [-4.0 + i as f64 * 0.5, 2.0 + j as f64 * 1.5];
                    assert_relative_eq!(
                        interp.evaluate(&pt).unwrap(),
                        image.get(&[i, j]).unwrap(),
                        epsilon = 1e-7
                    );
                }
            }
        }
    }

    #[test]
    fn test_order_1_matches_linear() {
        let image = test_images::smooth_2d();
        let bspline = BSplineInterpolator::new(image.clone(), 1).unwrap();
        let linear = LinearInterpolator::new(image);
        for step in 0..40 {
            let pt = [-3.8 + step as f64 * 0.27, 2.3 + step as f64 * 0.71];
            assert_relative_eq!(
                bspline.evaluate(&pt).unwrap(),
                linear.evaluate(&pt).unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let image = test_images::smooth_2d();
        let h = 1e-6;
        for order in 2..=3 {
            let interp = BSplineInterpolator::new(image.clone(), order).unwrap();
            for step in 0..30 {
                let pt = [-3.1 + step as f64 * 0.33, 3.7 + step as f64 * 0.87];
                let mut gradient = [0.0; 2];
                let value = interp.evaluate_with_gradient(&pt, &mut gradient).unwrap();
                assert_eq!(Some(value), interp.evaluate(&pt));
                for a in 0..2 {
                    let mut plus = pt;
                    plus[a] += h;
                    let mut minus = pt;
                    minus[a] -= h;
                    let fd = (interp.evaluate(&plus).unwrap() - interp.evaluate(&minus).unwrap())
                        / (2.0 * h);
                    assert_abs_diff_eq!(gradient[a], fd, epsilon = FD_TOLERANCE);
                }
            }
        }
    }

    #[test]
    fn test_constant_image() {
        let data = ArrayD::from_elem(IxDyn(&[6, 5, 4]), -1.5);
        let image = Arc::new(FeatureImage::from_array(data).unwrap());
        let interp = BSplineInterpolator::new(image, 3).unwrap();
        let mut gradient = [f64::NAN; 3];
        let value = interp
            .evaluate_with_gradient(&[-0.4, 2.2, 3.4], &mut gradient)
            .unwrap();
        assert_relative_eq!(value, -1.5, epsilon = 1e-10);
        for g in gradient {
            assert_abs_diff_eq!(g, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_outside() {
        let interp = BSplineInterpolator::new(test_images::smooth_2d(), 3).unwrap();
        assert!(interp.evaluate(&[-4.3, 5.0]).is_none());
        assert!(interp.evaluate(&[0.0, 1.0e6]).is_none());
        let as_derivative = Arc::new(interp).continuous_derivative();
        assert!(as_derivative.is_some());
    }
}
