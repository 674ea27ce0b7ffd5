//! Stacked spatial transforms and feature-channel image metrics for groupwise registration.
//!
//! A [StackTransform] maps N-dimensional (space + time) points
//! by routing each point to one of M independent (N-1)-dimensional sub-transforms,
//! selected by its last coordinate.
//! A [FeatureChannelRegistry] holds auxiliary feature images for a
//! [FeatureAugmentedMetric], which samples them alongside transformed points.
use smallvec::SmallVec;


mod error;
pub use error::{Error, Result};
mod matrix;
pub use matrix::Matrix;
mod jacobian;
pub use jacobian::SparseJacobian;
pub mod kernel;
mod traits;
pub use traits::{ParametricTransform, Transformation};

mod transforms;
pub use transforms::{
    AffineLogTransform, BSplineDeformableTransform, ControlGrid, DEFAULT_SPLINE_ORDER,
    StackTransform, StackTransformBuilder, SubTransform, SubTransformFactory, SubTransformKind,
    TranslationTransform,
};

mod feature_image;
pub use feature_image::FeatureImage;
pub mod interpolate;
pub use interpolate::{ContinuousDerivative, Interpolator, InterpolatorKind};
mod features;
pub use features::{FeatureChannelRegistry, FeatureChannels, Side};
mod metric;
pub use metric::{
    ChannelSample, ChannelValue, FeatureAugmentedMetric, FeatureSample, FeatureSimilarity,
    MetricConfig,
};
mod config;
pub use config::{FeatureConfig, ParameterMap, StackConfig};
mod component;
pub use component::{ComponentName, create_metric, create_stack_transform};

pub const COORD_SIZE: usize = 6;

/// A short vector type alias for convenience,
/// used for coordinates and per-axis geometry.
pub type ShortVec<T> = SmallVec<[T; COORD_SIZE]>;
