//! Sampling of [FeatureImage]s at physical points.
use std::{fmt, str::FromStr, sync::Arc};

use crate::{Error, FeatureImage, Result, ShortVec};

mod bspline;
pub use bspline::BSplineInterpolator;
mod decomposition;
pub use decomposition::{PendingDecomposition, dispatch_decomposition};
mod linear;
pub use linear::LinearInterpolator;
mod nearest;
pub use nearest::NearestNeighbourInterpolator;

/// Samples one feature image at physical points.
pub trait Interpolator: fmt::Debug + Send + Sync {
    /// The image this interpolator is bound to.
    fn image(&self) -> &Arc<FeatureImage>;

    fn ndim(&self) -> usize {
        self.image().ndim()
    }

    /// Value at a physical point, or `None` outside the image.
    fn evaluate(&self, pt: &[f64]) -> Option<f64>;

    /// This interpolator as one which provides a continuous spatial derivative, if it does.
    fn continuous_derivative(self: Arc<Self>) -> Option<Arc<dyn ContinuousDerivative>> {
        None
    }
}

/// An interpolator with a continuous spatial derivative.
pub trait ContinuousDerivative: Interpolator {
    /// Value at a physical point, writing the gradient with respect to the physical point into `gradient`.
    ///
    /// `None` outside the image, in which case `gradient` is unspecified.
    fn evaluate_with_gradient(&self, pt: &[f64], gradient: &mut [f64]) -> Option<f64>;
}

/// Kinds of interpolator which can be bound by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolatorKind {
    Nearest,
    #[default]
    Linear,
    BSpline,
}

impl fmt::Display for InterpolatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterpolatorKind::Nearest => "Nearest",
            InterpolatorKind::Linear => "Linear",
            InterpolatorKind::BSpline => "BSpline",
        };
        f.write_str(name)
    }
}

impl FromStr for InterpolatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Nearest" | "NearestNeighbor" | "NearestNeighbour" | "NearestNeighborInterpolator" => {
                Ok(InterpolatorKind::Nearest)
            }
            "Linear" | "LinearInterpolator" => Ok(InterpolatorKind::Linear),
            "BSpline" | "BSplineInterpolator" => Ok(InterpolatorKind::BSpline),
            other => Err(Error::UnknownComponent(other.to_string())),
        }
    }
}

impl InterpolatorKind {
    /// Create an interpolator of this kind bound to `image`, blocking on any precomputation.
    ///
    /// `spline_order` is only used by B-spline interpolators.
    pub fn create(self, image: Arc<FeatureImage>, spline_order: u32) -> Result<Arc<dyn Interpolator>> {
        Ok(match self {
            InterpolatorKind::Nearest => Arc::new(NearestNeighbourInterpolator::new(image)),
            InterpolatorKind::Linear => Arc::new(LinearInterpolator::new(image)),
            InterpolatorKind::BSpline => Arc::new(BSplineInterpolator::new(image, spline_order)?),
        })
    }
}

/// Clamp an integer voxel index into `[0, size)`.
fn clamp_index(idx: isize, size: usize) -> usize {
    idx.clamp(0, size as isize - 1) as usize
}

/// Reflect an integer voxel index into `[0, size)`, mirroring about the first and last voxels.
pub(crate) fn mirror_index(idx: isize, size: usize) -> usize {
    if size == 1 {
        return 0;
    }
    let period = 2 * (size as isize - 1);
    let m = idx.rem_euclid(period);
    if m >= size as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

/// Continuous index of `pt` in `image`, if it is inside.
fn inside_index(image: &FeatureImage, pt: &[f64]) -> Option<ShortVec<f64>> {
    let cidx = image.continuous_index(pt);
    image.is_inside(&cidx).then_some(cidx)
}
