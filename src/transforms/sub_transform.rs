use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    AffineLogTransform, BSplineDeformableTransform, ControlGrid, Error, Matrix,
    ParametricTransform, Result, ShortVec, SparseJacobian, Transformation, TranslationTransform,
};

/// Default polynomial degree of B-spline sub-transforms.
pub const DEFAULT_SPLINE_ORDER: u32 = 3;

/// The kinds of transform which can be stacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubTransformKind {
    AffineLog,
    Translation,
    #[default]
    BSpline,
}

impl fmt::Display for SubTransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubTransformKind::AffineLog => "AffineLog",
            SubTransformKind::Translation => "Translation",
            SubTransformKind::BSpline => "BSpline",
        };
        f.write_str(name)
    }
}

impl FromStr for SubTransformKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AffineLog" | "AffineLogTransform" => Ok(SubTransformKind::AffineLog),
            "Translation" | "TranslationTransform" => Ok(SubTransformKind::Translation),
            "BSpline" | "BSplineTransform" => Ok(SubTransformKind::BSpline),
            other => Err(Error::UnknownComponent(other.to_string())),
        }
    }
}

/// One slice's transform within a [crate::StackTransform].
///
/// A closed set of variants; B-spline transforms of each supported order are distinct variants.
#[derive(Debug, Clone)]
pub enum SubTransform {
    AffineLog(AffineLogTransform),
    Translation(TranslationTransform),
    BSpline1(BSplineDeformableTransform<1>),
    BSpline2(BSplineDeformableTransform<2>),
    BSpline3(BSplineDeformableTransform<3>),
}

macro_rules! delegate {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            SubTransform::AffineLog($t) => $body,
            SubTransform::Translation($t) => $body,
            SubTransform::BSpline1($t) => $body,
            SubTransform::BSpline2($t) => $body,
            SubTransform::BSpline3($t) => $body,
        }
    };
}

impl SubTransform {
    pub fn kind(&self) -> SubTransformKind {
        match self {
            SubTransform::AffineLog(_) => SubTransformKind::AffineLog,
            SubTransform::Translation(_) => SubTransformKind::Translation,
            SubTransform::BSpline1(_) | SubTransform::BSpline2(_) | SubTransform::BSpline3(_) => {
                SubTransformKind::BSpline
            }
        }
    }

    /// Whether `other` could stand in for this transform without changing the parameter layout.
    pub(crate) fn same_layout(&self, other: &SubTransform) -> bool {
        self.kind() == other.kind()
            && self.spline_order() == other.spline_order()
            && self.input_ndim() == other.input_ndim()
            && self.number_of_parameters() == other.number_of_parameters()
    }
}

impl Transformation for SubTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        delegate!(self, t => t.transform_into(pt, buf))
    }

    fn bulk_transform_into(&self, pts: &[&[f64]], bufs: &mut [&mut [f64]]) {
        delegate!(self, t => t.bulk_transform_into(pts, bufs))
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        delegate!(self, t => t.column_transform_into(columns, bufs))
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        delegate!(self, t => t.invert())
    }

    fn is_identity(&self) -> bool {
        delegate!(self, t => t.is_identity())
    }

    fn input_ndim(&self) -> usize {
        delegate!(self, t => t.input_ndim())
    }

    fn output_ndim(&self) -> usize {
        delegate!(self, t => t.output_ndim())
    }
}

impl ParametricTransform for SubTransform {
    fn number_of_parameters(&self) -> usize {
        delegate!(self, t => t.number_of_parameters())
    }

    fn parameters(&self) -> &[f64] {
        delegate!(self, t => t.parameters())
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        delegate!(self, t => t.set_parameters(params))
    }

    fn jacobian(&self, pt: &[f64]) -> SparseJacobian {
        delegate!(self, t => t.jacobian(pt))
    }

    fn spatial_jacobian(&self, pt: &[f64]) -> Matrix {
        delegate!(self, t => t.spatial_jacobian(pt))
    }

    fn spline_order(&self) -> Option<u32> {
        delegate!(self, t => t.spline_order())
    }
}

fn bspline_order_1(grid: ControlGrid) -> SubTransform {
    SubTransform::BSpline1(BSplineDeformableTransform::new(grid))
}

fn bspline_order_2(grid: ControlGrid) -> SubTransform {
    SubTransform::BSpline2(BSplineDeformableTransform::new(grid))
}

fn bspline_order_3(grid: ControlGrid) -> SubTransform {
    SubTransform::BSpline3(BSplineDeformableTransform::new(grid))
}

/// B-spline constructors, indexed by `order - 1`.
const BSPLINE_BY_ORDER: [fn(ControlGrid) -> SubTransform; 3] =
    [bspline_order_1, bspline_order_2, bspline_order_3];

/// Produces identity sub-transforms of a fixed dimensionality and geometry.
#[derive(Debug, Clone)]
pub struct SubTransformFactory {
    ndim: usize,
    grid: Option<ControlGrid>,
    center: Option<ShortVec<f64>>,
}

impl SubTransformFactory {
    pub fn new(ndim: usize) -> Self {
        Self {
            ndim,
            grid: None,
            center: None,
        }
    }

    /// Control grid for B-spline sub-transforms.
    pub fn with_grid(mut self, grid: ControlGrid) -> Result<Self> {
        if grid.ndim() != self.ndim {
            return Err(Error::DimensionMismatch {
                expected: self.ndim,
                got: grid.ndim(),
            });
        }
        self.grid = Some(grid);
        Ok(self)
    }

    /// Centre of rotation for affine sub-transforms.
    pub fn with_center(mut self, center: &[f64]) -> Result<Self> {
        if center.len() != self.ndim {
            return Err(Error::DimensionMismatch {
                expected: self.ndim,
                got: center.len(),
            });
        }
        self.center = Some(center.iter().copied().collect());
        Ok(self)
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn grid(&self) -> Option<&ControlGrid> {
        self.grid.as_ref()
    }

    /// Create an identity sub-transform of the given kind.
    ///
    /// `order` is only used by B-spline transforms, for which it must be 1, 2 or 3,
    /// and a control grid must have been given;
    /// otherwise `None` is returned.
    pub fn create(&self, kind: SubTransformKind, order: u32) -> Option<SubTransform> {
        match kind {
            SubTransformKind::Translation => Some(SubTransform::Translation(
                TranslationTransform::new(self.ndim),
            )),
            SubTransformKind::AffineLog => {
                let t = AffineLogTransform::new(self.ndim);
                match &self.center {
                    Some(c) => t.with_center(c).ok().map(SubTransform::AffineLog),
                    None => Some(SubTransform::AffineLog(t)),
                }
            }
            SubTransformKind::BSpline => {
                let ctor = BSPLINE_BY_ORDER.get((order as usize).checked_sub(1)?)?;
                Some(ctor(self.grid.clone()?))
            }
        }
    }

    /// As [SubTransformFactory::create], reporting why no transform could be made.
    pub fn try_create(&self, kind: SubTransformKind, order: u32) -> Result<SubTransform> {
        if kind == SubTransformKind::BSpline {
            if !crate::kernel::is_supported_order(order) {
                return Err(Error::UnsupportedSplineOrder(order));
            }
            if self.grid.is_none() {
                return Err(Error::MissingControlGrid);
            }
        }
        self.create(kind, order)
            .ok_or_else(|| Error::invalid_parameter("sub-transform", format!("cannot create {kind}")))
    }
}
