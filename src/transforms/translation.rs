use std::sync::Arc;

use crate::{
    Error, Matrix, ParametricTransform, Result, SparseJacobian, Transformation,
    error::check_finite,
};

/// Translate each coordinate by adding a parameterised offset.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationTransform(Vec<f64>);

impl TranslationTransform {
    /// The identity translation in `ndim` dimensions.
    pub fn new(ndim: usize) -> Self {
        Self(vec![0.0; ndim])
    }

    pub fn try_new(translate: &[f64]) -> Result<Self> {
        check_finite("translation", translate)?;
        Ok(Self(translate.to_vec()))
    }

    pub fn offset(&self) -> &[f64] {
        &self.0
    }

    pub fn inverse(&self) -> Self {
        Self(self.0.iter().map(|t| -t).collect())
    }
}

impl Transformation for TranslationTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        for ((o, p), t) in buf.iter_mut().zip(pt.iter()).zip(self.0.iter()) {
            *o = t + p;
        }
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        for ((col_in, buf_in), t) in columns.iter().zip(bufs.iter_mut()).zip(self.0.iter()) {
            for (c, b) in col_in.iter().zip(buf_in.iter_mut()) {
                *b = c + t;
            }
        }
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        Some(Arc::new(self.inverse()))
    }

    fn input_ndim(&self) -> usize {
        self.0.len()
    }

    fn output_ndim(&self) -> usize {
        self.0.len()
    }

    fn is_identity(&self) -> bool {
        self.0.iter().all(|t| *t == 0.0)
    }
}

impl ParametricTransform for TranslationTransform {
    fn number_of_parameters(&self) -> usize {
        self.0.len()
    }

    fn parameters(&self) -> &[f64] {
        &self.0
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.0.len() {
            return Err(Error::ParameterLength {
                expected: self.0.len(),
                got: params.len(),
            });
        }
        check_finite("translation", params)?;
        self.0.copy_from_slice(params);
        Ok(())
    }

    fn jacobian(&self, _pt: &[f64]) -> SparseJacobian {
        let ndim = self.0.len();
        let mut jac = SparseJacobian::zeros(ndim, (0..ndim).collect());
        for d in 0..ndim {
            jac.set(d, d, 1.0);
        }
        jac
    }

    fn spatial_jacobian(&self, _pt: &[f64]) -> Matrix {
        Matrix::identity(self.0.len())
    }
}
