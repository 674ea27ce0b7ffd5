//! Sparse parameter Jacobians.
//!
//! Most transforms used in registration only depend on a small subset of their parameters
//! at any given point (a B-spline on the control points around it,
//! a stack on the parameters of a single slice).
//! The Jacobian is therefore stored as a dense block over the columns which may be nonzero.

/// Jacobian of a transformed point with respect to a parameter vector.
///
/// Columns not listed in [SparseJacobian::indices] are exactly zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseJacobian {
    nrows: usize,
    /// Parameter index of each stored column, ascending.
    indices: Vec<usize>,
    /// Row-major, `nrows * indices.len()`.
    values: Vec<f64>,
}

impl SparseJacobian {
    /// A Jacobian with no nonzero columns.
    pub fn empty(nrows: usize) -> Self {
        Self {
            nrows,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Zero-valued Jacobian over the given columns.
    pub fn zeros(nrows: usize, indices: Vec<usize>) -> Self {
        let values = vec![0.0; nrows * indices.len()];
        Self {
            nrows,
            indices,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.indices.len()
    }

    /// Parameter indices of the stored columns.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let n = self.ncols();
        &self.values[row * n..(row + 1) * n]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let n = self.ncols();
        &mut self.values[row * n..(row + 1) * n]
    }

    /// Value at `row` for the `col`-th stored column.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.ncols() + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let n = self.ncols();
        self.values[row * n + col] = value;
    }

    /// Shift every parameter index by `offset`,
    /// e.g. to embed a sub-transform's Jacobian in a larger parameter vector.
    pub fn offset_indices(&mut self, offset: usize) {
        for i in self.indices.iter_mut() {
            *i += offset;
        }
    }

    /// Embed into `nrows` rows; rows beyond the current count are zero.
    ///
    /// Panics if `nrows` is smaller than the current row count.
    pub fn with_rows(mut self, nrows: usize) -> Self {
        assert!(nrows >= self.nrows, "cannot drop Jacobian rows");
        self.values.resize(nrows * self.ncols(), 0.0);
        self.nrows = nrows;
        self
    }

    /// Contract a spatial gradient with the Jacobian: `grad^T * J`,
    /// giving one value per stored column.
    pub fn left_multiply(&self, grad: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.ncols()];
        for (row, g) in grad.iter().enumerate().take(self.nrows) {
            for (o, v) in out.iter_mut().zip(self.row(row)) {
                *o += g * v;
            }
        }
        out
    }

    /// Expand into a dense row-major `nrows * n_params` matrix.
    pub fn to_dense(&self, n_params: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.nrows * n_params];
        for row in 0..self.nrows {
            for (col, idx) in self.indices.iter().enumerate() {
                out[row * n_params + idx] = self.get(row, col);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::SparseJacobian;

    fn make_jacobian() -> SparseJacobian {
        let mut jac = SparseJacobian::zeros(2, vec![1, 3]);
        jac.set(0, 0, 1.0);
        jac.set(0, 1, 2.0);
        jac.set(1, 0, 3.0);
        jac.set(1, 1, 4.0);
        jac
    }

    #[test]
    fn test_to_dense() {
        let dense = make_jacobian().to_dense(4);
        assert_eq!(dense, vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0]);
    }

    #[test]
    fn test_offset_and_rows() {
        let mut jac = make_jacobian();
        jac.offset_indices(4);
        let jac = jac.with_rows(3);
        assert_eq!(jac.indices(), &[5, 7]);
        assert_eq!(jac.row(1), &[3.0, 4.0]);
        assert_eq!(jac.row(2), &[0.0, 0.0]);
    }

    #[test]
    fn test_left_multiply() {
        let out = make_jacobian().left_multiply(&[1.0, -1.0]);
        assert_eq!(out, vec![-2.0, -2.0]);
    }
}
