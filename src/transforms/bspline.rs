use std::sync::Arc;

use smallvec::smallvec;

use crate::{
    Error, Matrix, ParametricTransform, Result, ShortVec, SparseJacobian, Transformation,
    error::check_finite,
    kernel::{self, MAX_SPLINE_ORDER},
};

type Weights = ShortVec<[f64; MAX_SPLINE_ORDER + 1]>;

/// Regular grid of B-spline control points in physical space.
///
/// Control point `i` along axis `a` sits at `origin[a] + i * spacing[a]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlGrid {
    origin: ShortVec<f64>,
    spacing: ShortVec<f64>,
    size: ShortVec<usize>,
}

impl ControlGrid {
    pub fn try_new(origin: &[f64], spacing: &[f64], size: &[usize]) -> Result<Self> {
        let ndim = origin.len();
        for len in [spacing.len(), size.len()] {
            if len != ndim {
                return Err(Error::DimensionMismatch {
                    expected: ndim,
                    got: len,
                });
            }
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(Error::InvalidGeometry("grid origin must be finite".into()));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::InvalidGeometry(
                "grid spacing must be finite and positive".into(),
            ));
        }
        if size.iter().any(|s| *s == 0) {
            return Err(Error::InvalidGeometry("grid size must be nonzero".into()));
        }
        Ok(Self {
            origin: origin.iter().copied().collect(),
            spacing: spacing.iter().copied().collect(),
            size: size.iter().copied().collect(),
        })
    }

    pub fn ndim(&self) -> usize {
        self.size.len()
    }

    pub fn origin(&self) -> &[f64] {
        &self.origin
    }

    pub fn spacing(&self) -> &[f64] {
        &self.spacing
    }

    pub fn size(&self) -> &[usize] {
        &self.size
    }

    pub fn number_of_points(&self) -> usize {
        self.size.iter().product()
    }

    /// Flat index strides, first axis fastest.
    fn strides(&self) -> ShortVec<usize> {
        let mut stride = 1;
        self.size
            .iter()
            .map(|s| {
                let out = stride;
                stride *= s;
                out
            })
            .collect()
    }
}

/// Free-form deformation over a control grid, with basis functions of degree `ORDER`.
///
/// Parameters are the control point displacements,
/// stored as one block per axis (all axis-0 displacements, then all axis-1 displacements, ...).
/// Points whose basis support extends beyond the grid are not deformed.
#[derive(Debug, Clone)]
pub struct BSplineDeformableTransform<const ORDER: usize> {
    grid: ControlGrid,
    strides: ShortVec<usize>,
    params: Vec<f64>,
}

/// Location of a point within the control grid.
struct Support {
    start: ShortVec<usize>,
    weights: Weights,
}

impl<const ORDER: usize> BSplineDeformableTransform<ORDER> {
    /// An identity deformation over the given grid.
    ///
    /// Panics if `ORDER` is not a supported spline order;
    /// use [crate::SubTransformFactory] for runtime-selected orders.
    pub fn new(grid: ControlGrid) -> Self {
        assert!(
            kernel::is_supported_order(ORDER as u32),
            "unsupported spline order {ORDER}"
        );
        let n_params = grid.ndim() * grid.number_of_points();
        Self {
            strides: grid.strides(),
            grid,
            params: vec![0.0; n_params],
        }
    }

    pub fn grid(&self) -> &ControlGrid {
        &self.grid
    }

    fn ndim(&self) -> usize {
        self.grid.ndim()
    }

    /// `None` if the support of `pt` is not entirely inside the grid.
    fn support(&self, pt: &[f64], derivative: bool) -> Option<Support> {
        let ndim = self.ndim();
        let mut start: ShortVec<usize> = smallvec![0; ndim];
        let mut weights: Weights = smallvec![[0.0; MAX_SPLINE_ORDER + 1]; ndim];
        for a in 0..ndim {
            let u = (pt[a] - self.grid.origin[a]) / self.grid.spacing[a];
            if !u.is_finite() {
                return None;
            }
            let w = &mut weights[a][..=ORDER];
            let first = if derivative {
                kernel::derivative_weights_into(ORDER, u, w)
            } else {
                kernel::weights_into(ORDER, u, w)
            };
            if first < 0 || first as usize + ORDER >= self.grid.size[a] {
                return None;
            }
            start[a] = first as usize;
        }
        Some(Support { start, weights })
    }

    /// Visit every control point in the support, first axis fastest,
    /// with its flat index and per-axis offsets into the support.
    fn for_each_support_point(&self, start: &[usize], mut f: impl FnMut(usize, &[usize])) {
        let ndim = self.ndim();
        let mut offsets: ShortVec<usize> = smallvec![0; ndim];
        let n_support = (ORDER + 1).pow(ndim as u32);
        for _ in 0..n_support {
            let flat = offsets
                .iter()
                .zip(start.iter())
                .zip(self.strides.iter())
                .map(|((o, s), st)| (o + s) * st)
                .sum();
            f(flat, &offsets);
            for o in offsets.iter_mut() {
                *o += 1;
                if *o <= ORDER {
                    break;
                }
                *o = 0;
            }
        }
    }

    fn weight(weights: &Weights, offsets: &[usize]) -> f64 {
        offsets
            .iter()
            .zip(weights.iter())
            .map(|(o, w)| w[*o])
            .product()
    }
}

impl<const ORDER: usize> Transformation for BSplineDeformableTransform<ORDER> {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        buf.copy_from_slice(&pt[..buf.len()]);
        let Some(support) = self.support(pt, false) else {
            return;
        };
        let n_points = self.grid.number_of_points();
        self.for_each_support_point(&support.start, |flat, offsets| {
            let w = Self::weight(&support.weights, offsets);
            for (a, b) in buf.iter_mut().enumerate() {
                *b += w * self.params[a * n_points + flat];
            }
        });
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        None
    }

    fn input_ndim(&self) -> usize {
        self.ndim()
    }

    fn output_ndim(&self) -> usize {
        self.ndim()
    }

    fn is_identity(&self) -> bool {
        self.params.iter().all(|p| *p == 0.0)
    }
}

impl<const ORDER: usize> ParametricTransform for BSplineDeformableTransform<ORDER> {
    fn number_of_parameters(&self) -> usize {
        self.params.len()
    }

    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(Error::ParameterLength {
                expected: self.params.len(),
                got: params.len(),
            });
        }
        check_finite("control point coefficients", params)?;
        self.params.copy_from_slice(params);
        Ok(())
    }

    fn jacobian(&self, pt: &[f64]) -> SparseJacobian {
        let ndim = self.ndim();
        let Some(support) = self.support(pt, false) else {
            return SparseJacobian::empty(ndim);
        };
        let n_points = self.grid.number_of_points();

        let mut flats = Vec::with_capacity((ORDER + 1).pow(ndim as u32));
        let mut values = Vec::with_capacity(flats.capacity());
        self.for_each_support_point(&support.start, |flat, offsets| {
            flats.push(flat);
            values.push(Self::weight(&support.weights, offsets));
        });

        let n_support = flats.len();
        let indices = (0..ndim)
            .flat_map(|a| flats.iter().map(move |f| a * n_points + f))
            .collect();
        let mut jac = SparseJacobian::zeros(ndim, indices);
        for a in 0..ndim {
            let row = jac.row_mut(a);
            row[a * n_support..(a + 1) * n_support].copy_from_slice(&values);
        }
        jac
    }

    fn spatial_jacobian(&self, pt: &[f64]) -> Matrix {
        let ndim = self.ndim();
        let mut out = Matrix::identity(ndim);
        let (Some(support), Some(derivative)) =
            (self.support(pt, false), self.support(pt, true))
        else {
            return out;
        };
        let n_points = self.grid.number_of_points();

        self.for_each_support_point(&support.start, |flat, offsets| {
            for b in 0..ndim {
                let mut dw = derivative.weights[b][offsets[b]] / self.grid.spacing[b];
                for (axis, (o, w)) in offsets.iter().zip(support.weights.iter()).enumerate() {
                    if axis != b {
                        dw *= w[*o];
                    }
                }
                for a in 0..ndim {
                    out[(a, b)] += dw * self.params[a * n_points + flat];
                }
            }
        });
        out
    }

    fn spline_order(&self) -> Option<u32> {
        Some(ORDER as u32)
    }
}
