use std::sync::Arc;

use crate::{
    Error, Matrix, ParametricTransform, Result, ShortVec, SparseJacobian, Transformation,
    error::check_finite,
};

/// Affine transform parameterised by the logarithm of its linear part.
///
/// With parameters `[L (row-major ndim x ndim), t (ndim)]`,
/// points are mapped as `y = exp(L) (x - c) + t + c` about a fixed centre `c`.
/// All-zero parameters give the identity.
#[derive(Debug, Clone)]
pub struct AffineLogTransform {
    ndim: usize,
    params: Vec<f64>,
    center: ShortVec<f64>,
    /// `exp(L)`, kept in sync with `params`.
    matrix: Matrix,
    /// Fréchet derivative of `exp` at `L` in the direction of each unit matrix `E_ij`.
    frechet: Vec<Matrix>,
}

impl AffineLogTransform {
    /// The identity transform in `ndim` dimensions, centred on the origin.
    pub fn new(ndim: usize) -> Self {
        let mut out = Self {
            ndim,
            params: vec![0.0; ndim * ndim + ndim],
            center: smallvec::smallvec![0.0; ndim],
            matrix: Matrix::identity(ndim),
            frechet: Vec::new(),
        };
        out.update_cache();
        out
    }

    pub fn with_center(mut self, center: &[f64]) -> Result<Self> {
        if center.len() != self.ndim {
            return Err(Error::DimensionMismatch {
                expected: self.ndim,
                got: center.len(),
            });
        }
        if center.iter().any(|c| !c.is_finite()) {
            return Err(Error::invalid_parameter("center", "must be finite"));
        }
        self.center = center.iter().copied().collect();
        Ok(self)
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    /// The linear part `exp(L)`.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// The inverse transform, about the same centre.
    ///
    /// Parameters are `L' = -L` and `t' = -exp(-L) t`.
    pub fn inverse(&self) -> Self {
        let n = self.ndim * self.ndim;
        let mut inv = self.clone();
        inv.params[..n]
            .iter_mut()
            .zip(self.params[..n].iter())
            .for_each(|(dst, l)| *dst = -l);
        inv.update_cache();
        let mut inv_t = vec![0.0; self.ndim];
        inv.matrix.matmul_into(self.translation(), &mut inv_t);
        for (dst, t) in inv.params[n..].iter_mut().zip(inv_t.iter()) {
            *dst = -t;
        }
        inv
    }

    fn log_matrix(&self) -> Matrix {
        let n = self.ndim * self.ndim;
        Matrix::try_new(self.params[..n].to_vec(), self.ndim.max(1))
            .unwrap_or_else(|_| Matrix::zeros(0, 0))
    }

    fn translation(&self) -> &[f64] {
        &self.params[self.ndim * self.ndim..]
    }

    fn update_cache(&mut self) {
        if self.ndim == 0 {
            return;
        }
        let log = self.log_matrix();
        self.matrix = log.expm();
        self.frechet = (0..self.ndim * self.ndim)
            .map(|idx| {
                let mut dir = Matrix::zeros(self.ndim, self.ndim);
                dir[(idx / self.ndim, idx % self.ndim)] = 1.0;
                log.expm_frechet(&dir)
            })
            .collect();
    }
}

impl Transformation for AffineLogTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        let centered: ShortVec<f64> = pt.iter().zip(self.center.iter()).map(|(p, c)| p - c).collect();
        self.matrix.matmul_into(&centered, buf);
        for ((o, t), c) in buf.iter_mut().zip(self.translation()).zip(self.center.iter()) {
            *o += t + c;
        }
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        let centered: Vec<Vec<f64>> = columns
            .iter()
            .zip(self.center.iter())
            .map(|(col, c)| col.iter().map(|v| v - c).collect())
            .collect();
        let refs: Vec<&[f64]> = centered.iter().map(|c| c.as_slice()).collect();
        self.matrix.matmul_transposed_into(&refs, bufs);
        for ((col, t), c) in bufs.iter_mut().zip(self.translation()).zip(self.center.iter()) {
            for v in col.iter_mut() {
                *v += t + c;
            }
        }
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        Some(Arc::new(self.inverse()))
    }

    fn input_ndim(&self) -> usize {
        self.ndim
    }

    fn output_ndim(&self) -> usize {
        self.ndim
    }

    fn is_identity(&self) -> bool {
        self.params.iter().all(|p| *p == 0.0)
    }
}

impl ParametricTransform for AffineLogTransform {
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
        check_finite("affine parameters", params)?;
        self.params.copy_from_slice(params);
        self.update_cache();
        Ok(())
    }

    fn jacobian(&self, pt: &[f64]) -> SparseJacobian {
        let ndim = self.ndim;
        let n_log = ndim * ndim;
        let mut jac = SparseJacobian::zeros(ndim, (0..self.params.len()).collect());
        let centered: ShortVec<f64> = pt.iter().zip(self.center.iter()).map(|(p, c)| p - c).collect();

        let mut column = vec![0.0; ndim];
        for (col, frechet) in self.frechet.iter().enumerate() {
            frechet.matmul_into(&centered, &mut column);
            for (row, v) in column.iter().enumerate() {
                jac.set(row, col, *v);
            }
        }
        for d in 0..ndim {
            jac.set(d, n_log + d, 1.0);
        }
        jac
    }

    fn spatial_jacobian(&self, _pt: &[f64]) -> Matrix {
        self.matrix.clone()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::AffineLogTransform;
    use crate::tests::{
        check_inverse_transform_bulk, check_inverse_transform_col, check_inverse_transform_coord,
        check_jacobian_finite_difference, check_transform_bulk, check_transform_col,
    };
    use crate::{Error, ParametricTransform, Transformation};

    fn make_transform() -> AffineLogTransform {
        #[rustfmt::skip]
        let params = [
            0.05, -0.2, 0.01,
            0.2, 0.03, 0.0,
            -0.01, 0.02, -0.1,
            5.0, -3.0, 1.5,
        ];
        let mut t = AffineLogTransform::new(3)
            .with_center(&[50.0, 40.0, 30.0])
            .unwrap();
        t.set_parameters(&params).unwrap();
        t
    }

    #[test]
    fn test_bulk() {
        check_transform_bulk(make_transform());
    }

    #[test]
    fn test_columns() {
        check_transform_col(make_transform());
    }

    #[test]
    fn test_inverse() {
        check_inverse_transform_coord(make_transform());
    }

    #[test]
    fn test_inverse_bulk() {
        check_inverse_transform_bulk(make_transform());
    }

    #[test]
    fn test_inverse_columns() {
        check_inverse_transform_col(make_transform());
    }

    #[test]
    fn test_jacobian() {
        check_jacobian_finite_difference(make_transform());
    }

    #[test]
    fn test_identity_by_default() {
        let t = AffineLogTransform::new(2);
        assert!(t.is_identity());
        assert_eq!(t.number_of_parameters(), 6);
        let mut out = [0.0; 2];
        t.transform_into(&[3.0, -4.0], &mut out);
        assert_eq!(out, [3.0, -4.0]);
    }

    #[test]
    fn test_non_finite_parameters_rejected() {
        let mut t = make_transform();
        let before = t.parameters().to_vec();
        let matrix = t.matrix().clone();
        for idx in [0, 4, 10] {
            let mut params = before.clone();
            params[idx] = f64::INFINITY;
            assert!(matches!(
                t.set_parameters(&params),
                Err(Error::InvalidParameter { .. })
            ));
            params[idx] = f64::NAN;
            assert!(t.set_parameters(&params).is_err());
        }
        assert_eq!(t.parameters(), before.as_slice());
        assert_eq!(t.matrix(), &matrix);
    }

    #[test]
    fn test_pure_rotation() {
        let theta = 0.3_f64;
        let mut t = AffineLogTransform::new(2);
        t.set_parameters(&[0.0, -theta, theta, 0.0, 0.0, 0.0]).unwrap();
        let mut out = [0.0; 2];
        t.transform_into(&[1.0, 0.0], &mut out);
        assert_relative_eq!(out[0], theta.cos(), epsilon = 1e-12);
        assert_relative_eq!(out[1], theta.sin(), epsilon = 1e-12);
    }
}
