use std::ops::{Index, IndexMut};

use crate::{Error, Result};

/// Number of squarings are chosen so the scaled matrix has at most this infinity norm.
const EXPM_SCALED_NORM: f64 = 0.5;
/// Taylor terms used for the scaled matrix exponential.
const EXPM_TAYLOR_TERMS: usize = 18;
/// Beyond this the exponential overflows regardless.
const EXPM_MAX_SQUARINGS: i32 = 64;

/// Small dense matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Row-major / C-ordered matrix data.
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl AsRef<Matrix> for Matrix {
    fn as_ref(&self) -> &Matrix {
        self
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        self.get(index.0, index.1)
            .expect("index should be in bounds")
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let ncols = self.ncols;
        &mut self.data[index.0 * ncols + index.1]
    }
}

impl Matrix {
    /// Row-major/ C order data
    pub fn try_new(data: Vec<f64>, ncols: usize) -> Result<Self> {
        if ncols == 0 || data.len() % ncols != 0 {
            return Err(Error::InvalidGeometry(format!(
                "matrix data length {} is not divisible by ncols {}",
                data.len(),
                ncols
            )));
        }
        let nrows = data.len() / ncols;
        Ok(Self { data, nrows, ncols })
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    pub fn identity(ndim: usize) -> Self {
        let mut out = Self::zeros(ndim, ndim);
        for i in 0..ndim {
            out[(i, i)] = 1.0;
        }
        out
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn matmul_into(&self, coord: &[f64], buf: &mut [f64]) {
        buf.fill(0.0);
        for (idx, d) in self.data.iter().enumerate() {
            let r = idx / self.ncols;
            let c = idx % self.ncols;
            buf[r] += d * coord[c];
        }
    }

    /// N.B. Coordinate "columns" are the _rows_ of the input and output matrices.
    pub fn matmul_transposed_into(&self, coord_cols: &[&[f64]], buf: &mut [&mut [f64]]) {
        for (out_dim_idx, buf_col) in buf.iter_mut().enumerate() {
            buf_col.fill(0.0);
            let row_start = out_dim_idx * self.ncols;
            let row = &self.data[row_start..(row_start + self.ncols)];
            for (mat_val, coord_col) in row.iter().zip(coord_cols.iter()) {
                for (c, b) in coord_col.iter().zip(buf_col.iter_mut()) {
                    *b += c * mat_val;
                }
            }
        }
    }

    /// Matrix product `self * other`.
    ///
    /// Panics if the inner dimensions differ.
    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.ncols, other.nrows, "matrix product dimension mismatch");
        let mut out = Matrix::zeros(self.nrows, other.ncols);
        for r in 0..self.nrows {
            for k in 0..self.ncols {
                let a = self[(r, k)];
                if a == 0.0 {
                    continue;
                }
                for c in 0..other.ncols {
                    out[(r, c)] += a * other[(k, c)];
                }
            }
        }
        out
    }

    pub fn scaled(&self, factor: f64) -> Matrix {
        Matrix {
            data: self.data.iter().map(|d| d * factor).collect(),
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    fn norm_inf(&self) -> f64 {
        (0..self.nrows)
            .map(|r| {
                self.data[r * self.ncols..(r + 1) * self.ncols]
                    .iter()
                    .map(|d| d.abs())
                    .sum::<f64>()
            })
            .fold(0.0, f64::max)
    }

    /// Matrix exponential by scaling and squaring of a truncated Taylor series.
    ///
    /// Panics for non-square matrices.
    pub fn expm(&self) -> Matrix {
        assert_eq!(self.nrows, self.ncols, "expm needs a square matrix");
        let norm = self.norm_inf();
        if !norm.is_finite() {
            return Matrix {
                data: vec![f64::NAN; self.data.len()],
                nrows: self.nrows,
                ncols: self.ncols,
            };
        }
        let squarings = if norm > EXPM_SCALED_NORM {
            ((norm / EXPM_SCALED_NORM).log2().ceil() as i32).min(EXPM_MAX_SQUARINGS)
        } else {
            0
        };
        let scaled = self.scaled(0.5_f64.powi(squarings));

        let mut out = Matrix::identity(self.nrows);
        let mut term = Matrix::identity(self.nrows);
        for k in 1..=EXPM_TAYLOR_TERMS {
            term = term.mul(&scaled).scaled(1.0 / k as f64);
            for (o, t) in out.data.iter_mut().zip(term.data.iter()) {
                *o += t;
            }
        }
        for _ in 0..squarings {
            out = out.mul(&out);
        }
        out
    }

    /// Fréchet derivative of the matrix exponential at `self` in `direction`.
    ///
    /// Uses `exp([[A, E], [0, A]]) = [[exp(A), L(A, E)], [0, exp(A)]]`.
    pub fn expm_frechet(&self, direction: &Matrix) -> Matrix {
        let n = self.nrows;
        let mut block = Matrix::zeros(2 * n, 2 * n);
        for r in 0..n {
            for c in 0..n {
                block[(r, c)] = self[(r, c)];
                block[(r + n, c + n)] = self[(r, c)];
                block[(r, c + n)] = direction[(r, c)];
            }
        }
        let exp_block = block.expm();
        let mut out = Matrix::zeros(n, n);
        for r in 0..n {
            for c in 0..n {
                out[(r, c)] = exp_block[(r, c + n)];
            }
        }
        out
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&f64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_identity(&self) -> bool {
        if self.nrows != self.ncols {
            return false;
        }
        self.data.iter().enumerate().all(|(idx, d)| {
            let expected = if idx / self.ncols == idx % self.ncols { 1.0 } else { 0.0 };
            *d == expected
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init_logger;
    use approx::{assert_relative_eq, assert_ulps_eq};
    use faer::rand::{Rng, SeedableRng, rngs::SmallRng};

    fn new_rng() -> SmallRng {
        SmallRng::seed_from_u64(1991)
    }

    fn random_matrix(rng: &mut SmallRng, ndim: usize, scale: f64) -> Matrix {
        let data = (0..ndim * ndim)
            .map(|_| (rng.random::<f64>() - 0.5) * scale)
            .collect();
        Matrix::try_new(data, ndim).unwrap()
    }

    #[test]
    fn test_matmul_into() {
        #[rustfmt::skip]
        let data = vec![
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0
        ];
        let mat = Matrix::try_new(data, 3).unwrap();
        let mut out = vec![f64::NAN; 3];
        mat.matmul_into(&[10.0, 100.0, 1000.0], &mut out);
        let expected: [f64; 3] = [3210.0, 6540.0, 9870.0];
        assert_ulps_eq!(out.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_expm_diagonal() {
        init_logger();
        #[rustfmt::skip]
        let data = vec![
            1.5, 0.0,
            0.0, -2.0,
        ];
        let exp = Matrix::try_new(data, 2).unwrap().expm();
        assert_relative_eq!(exp[(0, 0)], 1.5_f64.exp(), max_relative = 1e-12);
        assert_relative_eq!(exp[(1, 1)], (-2.0_f64).exp(), max_relative = 1e-12);
        assert_eq!(exp[(0, 1)], 0.0);
    }

    #[test]
    fn test_expm_rotation() {
        let theta = 0.7_f64;
        #[rustfmt::skip]
        let data = vec![
            0.0, -theta,
            theta, 0.0,
        ];
        let exp = Matrix::try_new(data, 2).unwrap().expm();
        assert_relative_eq!(exp[(0, 0)], theta.cos(), epsilon = 1e-12);
        assert_relative_eq!(exp[(0, 1)], -theta.sin(), epsilon = 1e-12);
        assert_relative_eq!(exp[(1, 0)], theta.sin(), epsilon = 1e-12);
        assert_relative_eq!(exp[(1, 1)], theta.cos(), epsilon = 1e-12);
    }

    #[test]
    fn test_expm_non_finite_is_nan() {
        let mut mat = Matrix::zeros(3, 3);
        mat[(0, 1)] = f64::INFINITY;
        assert!(mat.expm().as_slice().iter().all(|v| v.is_nan()));
        mat[(0, 1)] = f64::NAN;
        assert!(mat.expm().as_slice().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_expm_huge_norm_terminates() {
        let mut mat = Matrix::zeros(2, 2);
        mat[(0, 0)] = 1e300;
        assert!(mat.expm().as_slice().iter().any(|v| !v.is_finite()));
    }

    #[test]
    fn test_expm_of_negation_is_inverse() {
        let mut rng = new_rng();
        for ndim in 1..4 {
            let mat = random_matrix(&mut rng, ndim, 3.0);
            let product = mat.expm().mul(&mat.scaled(-1.0).expm());
            let identity = Matrix::identity(ndim);
            assert_relative_eq!(product.as_slice(), identity.as_slice(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_expm_frechet_matches_finite_difference() {
        let mut rng = new_rng();
        let h = 1e-6;
        for ndim in 1..4 {
            let mat = random_matrix(&mut rng, ndim, 2.0);
            let dir = random_matrix(&mut rng, ndim, 1.0);
            let frechet = mat.expm_frechet(&dir);

            let mut plus = mat.clone();
            let mut minus = mat.clone();
            for r in 0..ndim {
                for c in 0..ndim {
                    plus[(r, c)] += h * dir[(r, c)];
                    minus[(r, c)] -= h * dir[(r, c)];
                }
            }
            let (ep, em) = (plus.expm(), minus.expm());
            for r in 0..ndim {
                for c in 0..ndim {
                    let fd = (ep[(r, c)] - em[(r, c)]) / (2.0 * h);
                    assert_relative_eq!(frechet[(r, c)], fd, epsilon = 1e-6);
                }
            }
        }
    }
}
