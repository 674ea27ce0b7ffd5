mod affine_log;
pub use affine_log::AffineLogTransform;
mod bspline;
pub use bspline::{BSplineDeformableTransform, ControlGrid};
mod stack;
pub use stack::{StackTransform, StackTransformBuilder};
mod sub_transform;
pub use sub_transform::{DEFAULT_SPLINE_ORDER, SubTransform, SubTransformFactory, SubTransformKind};
mod translation;
pub use translation::TranslationTransform;
