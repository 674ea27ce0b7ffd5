use std::sync::Arc;

use crate::{
    ControlGrid, DEFAULT_SPLINE_ORDER, Error, Matrix, ParametricTransform, Result, ShortVec,
    SparseJacobian, StackConfig, SubTransform, SubTransformFactory, SubTransformKind,
    Transformation,
    error::{check_finite, check_index},
};

/// An N-dimensional transform made of M independent (N-1)-dimensional sub-transforms.
///
/// The last coordinate (typically time) selects a slice
/// `k = clamp(round((p[N-1] - origin) / spacing), 0, M-1)`;
/// the remaining coordinates are transformed by sub-transform `k`
/// and the last coordinate is passed through unchanged.
///
/// The parameter vector is the concatenation, in slice order,
/// of every sub-transform's parameters.
#[derive(Debug, Clone)]
pub struct StackTransform {
    factory: SubTransformFactory,
    kind: SubTransformKind,
    spline_order: u32,
    stack_origin: f64,
    stack_spacing: f64,
    sub_transforms: Vec<SubTransform>,
    /// Concatenated parameters, kept in sync with `sub_transforms`.
    params: Vec<f64>,
}

impl StackTransform {
    pub fn builder(ndim: usize) -> StackTransformBuilder {
        StackTransformBuilder::new(ndim)
    }

    /// Build a stack from configuration.
    pub fn new(config: &StackConfig) -> Result<Self> {
        let mut builder = Self::builder(config.ndim)
            .kind(config.kind, config.spline_order)
            .number_of_sub_transforms(config.number_of_sub_transforms)
            .stack_origin(config.stack_origin)
            .stack_spacing(config.stack_spacing);
        if let Some(grid) = &config.grid {
            builder = builder.grid(grid.clone());
        }
        if let Some(center) = &config.center {
            builder = builder.center(center);
        }
        builder.build()
    }

    fn make_sub_transforms(
        factory: &SubTransformFactory,
        kind: SubTransformKind,
        order: u32,
        count: usize,
    ) -> Result<Vec<SubTransform>> {
        if count == 0 {
            return Err(Error::InvalidStackSize);
        }
        let first = factory.try_create(kind, order)?;
        log::debug!(
            "Creating {count} {kind} sub-transforms of {} parameters each",
            first.number_of_parameters()
        );
        Ok(vec![first; count])
    }

    fn sync_params(&mut self) {
        self.params.clear();
        for t in self.sub_transforms.iter() {
            self.params.extend_from_slice(t.parameters());
        }
    }

    /// Dimensionality of the sub-transforms.
    pub fn sub_ndim(&self) -> usize {
        self.factory.ndim()
    }

    pub fn kind(&self) -> SubTransformKind {
        self.kind
    }

    pub fn number_of_sub_transforms(&self) -> usize {
        self.sub_transforms.len()
    }

    /// Number of parameters of each sub-transform.
    pub fn sub_parameters(&self) -> usize {
        self.sub_transforms[0].number_of_parameters()
    }

    /// Replace every sub-transform with `count` new identity sub-transforms.
    ///
    /// Existing parameter values are lost. On error, the stack is unchanged.
    pub fn set_number_of_sub_transforms(&mut self, count: usize) -> Result<()> {
        self.sub_transforms =
            Self::make_sub_transforms(&self.factory, self.kind, self.spline_order, count)?;
        self.sync_params();
        Ok(())
    }

    /// Change the kind (and spline order) of every sub-transform.
    ///
    /// All sub-transforms are rebuilt as identities. On error, the stack is unchanged.
    pub fn set_sub_transform_kind(&mut self, kind: SubTransformKind, order: u32) -> Result<()> {
        self.sub_transforms = Self::make_sub_transforms(
            &self.factory,
            kind,
            order,
            self.sub_transforms.len(),
        )?;
        self.kind = kind;
        self.spline_order = order;
        self.sync_params();
        Ok(())
    }

    pub fn stack_origin(&self) -> f64 {
        self.stack_origin
    }

    pub fn set_stack_origin(&mut self, origin: f64) -> Result<()> {
        self.stack_origin = validate_origin(origin)?;
        Ok(())
    }

    pub fn stack_spacing(&self) -> f64 {
        self.stack_spacing
    }

    pub fn set_stack_spacing(&mut self, spacing: f64) -> Result<()> {
        self.stack_spacing = validate_spacing(spacing)?;
        Ok(())
    }

    /// Slice selected by the last coordinate of a point; always a valid index.
    pub fn slice_index(&self, last: f64) -> usize {
        let max = self.sub_transforms.len() - 1;
        let k = ((last - self.stack_origin) / self.stack_spacing).round();
        // NaN saturates to 0
        (k.max(0.0) as usize).min(max)
    }

    pub fn sub_transform(&self, idx: usize) -> Option<&SubTransform> {
        self.sub_transforms.get(idx)
    }

    /// Mutable access to one sub-transform.
    ///
    /// Takes a closure so that the concatenated parameters stay in sync.
    /// If the closure changes the sub-transform's parameter layout,
    /// the change is reverted and an error returned.
    pub fn with_sub_transform_mut<R>(
        &mut self,
        idx: usize,
        f: impl FnOnce(&mut SubTransform) -> R,
    ) -> Result<R> {
        check_index(idx, self.sub_transforms.len())?;
        let backup = self.sub_transforms[idx].clone();
        let out = f(&mut self.sub_transforms[idx]);
        if !backup.same_layout(&self.sub_transforms[idx]) {
            let kind = self.sub_transforms[idx].kind();
            self.sub_transforms[idx] = backup;
            return Err(Error::invalid_parameter(
                "sub-transform",
                format!("expected {} layout, got {kind}", self.kind),
            ));
        }
        let n = self.sub_parameters();
        self.params[idx * n..(idx + 1) * n].copy_from_slice(self.sub_transforms[idx].parameters());
        Ok(out)
    }

    /// Copy `template` into every slice.
    ///
    /// The template must have the same kind, spline order and parameter layout as the current sub-transforms.
    pub fn set_all_sub_transforms(&mut self, template: &SubTransform) -> Result<()> {
        if !self.sub_transforms[0].same_layout(template) {
            return Err(Error::invalid_parameter(
                "sub-transform",
                format!("expected {} layout, got {}", self.kind, template.kind()),
            ));
        }
        for t in self.sub_transforms.iter_mut() {
            *t = template.clone();
        }
        self.sync_params();
        Ok(())
    }

    /// Split a point into its projection onto the sub-transform space,
    /// its stacking coordinate and the selected slice.
    fn project<'a>(&self, pt: &'a [f64]) -> (&'a [f64], f64, usize) {
        let n = pt.len() - 1;
        (&pt[..n], pt[n], self.slice_index(pt[n]))
    }
}

impl Transformation for StackTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        let (projected, last, k) = self.project(pt);
        let n = projected.len();
        self.sub_transforms[k].transform_into(projected, &mut buf[..n]);
        buf[n] = last;
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        let mut inv = self.clone();
        for (slot, t) in inv.sub_transforms.iter_mut().zip(self.sub_transforms.iter()) {
            *slot = invert_sub_transform(t)?;
        }
        inv.sync_params();
        Some(Arc::new(inv))
    }

    fn is_identity(&self) -> bool {
        self.sub_transforms.iter().all(|t| t.is_identity())
    }

    fn input_ndim(&self) -> usize {
        self.sub_ndim() + 1
    }

    fn output_ndim(&self) -> usize {
        self.sub_ndim() + 1
    }
}

/// Inverse of a sub-transform as the same variant, so it can be placed in a stack.
fn invert_sub_transform(t: &SubTransform) -> Option<SubTransform> {
    match t {
        SubTransform::Translation(tr) => Some(SubTransform::Translation(tr.inverse())),
        SubTransform::AffineLog(a) => Some(SubTransform::AffineLog(a.inverse())),
        SubTransform::BSpline1(_) | SubTransform::BSpline2(_) | SubTransform::BSpline3(_) => None,
    }
}

impl ParametricTransform for StackTransform {
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
        check_finite("stack parameters", params)?;
        let n = self.sub_parameters();
        if n > 0 {
            for (t, chunk) in self.sub_transforms.iter_mut().zip(params.chunks_exact(n)) {
                t.set_parameters(chunk)?;
            }
        }
        self.params.copy_from_slice(params);
        Ok(())
    }

    fn jacobian(&self, pt: &[f64]) -> SparseJacobian {
        let (projected, _, k) = self.project(pt);
        let mut jac = self.sub_transforms[k].jacobian(projected);
        jac.offset_indices(k * self.sub_parameters());
        jac.with_rows(pt.len())
    }

    fn spatial_jacobian(&self, pt: &[f64]) -> Matrix {
        let (projected, _, k) = self.project(pt);
        let sub = self.sub_transforms[k].spatial_jacobian(projected);
        let ndim = pt.len();
        let mut out = Matrix::zeros(ndim, ndim);
        for r in 0..ndim - 1 {
            for c in 0..ndim - 1 {
                out[(r, c)] = sub[(r, c)];
            }
        }
        out[(ndim - 1, ndim - 1)] = 1.0;
        out
    }

    fn spline_order(&self) -> Option<u32> {
        self.sub_transforms[0].spline_order()
    }
}

fn validate_origin(origin: f64) -> Result<f64> {
    if !origin.is_finite() {
        return Err(Error::invalid_parameter("StackOrigin", "must be finite"));
    }
    Ok(origin)
}

fn validate_spacing(spacing: f64) -> Result<f64> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(Error::invalid_parameter(
            "StackSpacing",
            "must be finite and positive",
        ));
    }
    Ok(spacing)
}

#[derive(Debug, Clone)]
pub struct StackTransformBuilder {
    ndim: usize,
    kind: SubTransformKind,
    spline_order: u32,
    count: usize,
    origin: f64,
    spacing: f64,
    grid: Option<ControlGrid>,
    center: Option<ShortVec<f64>>,
}

impl StackTransformBuilder {
    /// `ndim` is the dimensionality of the stacked transform, including the stacking dimension.
    fn new(ndim: usize) -> Self {
        Self {
            ndim,
            kind: SubTransformKind::default(),
            spline_order: DEFAULT_SPLINE_ORDER,
            count: 1,
            origin: 0.0,
            spacing: 1.0,
            grid: None,
            center: None,
        }
    }

    pub fn kind(mut self, kind: SubTransformKind, spline_order: u32) -> Self {
        self.kind = kind;
        self.spline_order = spline_order;
        self
    }

    pub fn number_of_sub_transforms(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn stack_origin(mut self, origin: f64) -> Self {
        self.origin = origin;
        self
    }

    pub fn stack_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    /// Control grid of B-spline sub-transforms, in the (N-1)-dimensional sub-space.
    pub fn grid(mut self, grid: ControlGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Centre of affine sub-transforms, in the (N-1)-dimensional sub-space.
    pub fn center(mut self, center: &[f64]) -> Self {
        self.center = Some(center.iter().copied().collect());
        self
    }

    pub fn build(self) -> Result<StackTransform> {
        if self.ndim < 2 {
            return Err(Error::DimensionMismatch {
                expected: 2,
                got: self.ndim,
            });
        }
        let mut factory = SubTransformFactory::new(self.ndim - 1);
        if let Some(grid) = self.grid {
            factory = factory.with_grid(grid)?;
        }
        if let Some(center) = &self.center {
            factory = factory.with_center(center)?;
        }
        let sub_transforms =
            StackTransform::make_sub_transforms(&factory, self.kind, self.spline_order, self.count)?;

        let mut out = StackTransform {
            factory,
            kind: self.kind,
            spline_order: self.spline_order,
            stack_origin: validate_origin(self.origin)?,
            stack_spacing: validate_spacing(self.spacing)?,
            sub_transforms,
            params: Vec::new(),
        };
        out.sync_params();
        Ok(out)
    }
}
