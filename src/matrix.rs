use std::fmt;
use std::ops::{Index, IndexMut};

use faer::linalg::solvers::{Solve, SolveLstsq};
use faer::{Mat, MatRef};

use crate::{ShortVec, TransformError, TransformResult};

/// Dense row-major matrix of doubles.
///
/// Linear transforms store their augmented `(M+1)×(N+1)` matrix in this type;
/// the last row is `[0, ..., 0, 1]` for affine maps.
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
        assert!(index.0 < self.nrows && index.1 < self.ncols, "index should be in bounds");
        &mut self.data[index.0 * self.ncols + index.1]
    }
}

impl Matrix {
    pub fn builder(row_vecs: bool) -> MatrixBuilder {
        MatrixBuilder::new(row_vecs)
    }

    /// Row-major/ C order data
    pub fn try_new(data: Vec<f64>, ncols: usize) -> TransformResult<Self> {
        if ncols == 0 || data.len() % ncols != 0 {
            return Err(TransformError::invalid_argument(format!(
                "Matrix data length {} is not divisible by ncols {}",
                data.len(),
                ncols
            )));
        }
        let nrows = data.len() / ncols;
        Ok(Self { data, nrows, ncols })
    }

    pub fn try_new_colmaj(data: Vec<f64>, nrows: usize) -> TransformResult<Self> {
        if nrows == 0 || data.len() % nrows != 0 {
            return Err(TransformError::invalid_argument(format!(
                "Matrix data length {} is not divisible by nrows {}",
                data.len(),
                nrows
            )));
        }
        let ncols = data.len() / nrows;
        let colmaj = Matrix {
            data,
            nrows: ncols,
            ncols: nrows,
        };
        Ok(colmaj.transpose())
    }

    /// Build from a slice of equally-long rows.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> TransformResult<Self> {
        let mut builder = Self::builder(true);
        for r in rows {
            builder.add_vec(r.as_ref())?;
        }
        builder.build()
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.data[i * size + i] = 1.0;
        }
        m
    }

    pub fn transpose(&self) -> Matrix {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.nrows {
            for c in 0..self.ncols {
                data[c * self.nrows + r] = self[(r, c)];
            }
        }
        Matrix {
            data,
            nrows: self.ncols,
            ncols: self.nrows,
        }
    }

    pub fn matmul(&self, coord: &[f64]) -> ShortVec<f64> {
        let mut result = smallvec::smallvec![f64::NAN; self.nrows];
        self.matmul_into(coord, &mut result);
        result
    }

    pub fn matmul_into(&self, coord: &[f64], buf: &mut [f64]) {
        for (r, b) in buf.iter_mut().enumerate().take(self.nrows) {
            *b = self.row(r).iter().zip(coord.iter()).map(|(m, c)| m * c).sum();
        }
    }

    /// N.B. Coordinate "columns" are the _rows_ of the input and output matrices.
    pub fn matmul_transposed_into(&self, coord_cols: &[&[f64]], buf: &mut [&mut [f64]]) {
        for (out_dim_idx, buf_col) in buf.iter_mut().enumerate() {
            buf_col.fill(0.0);
            let row = self.row(out_dim_idx);
            for (mat_val, coord_col) in row.iter().zip(coord_cols.iter()) {
                // our hottest loop is iterating over long arrays in lock step
                for (c, b) in coord_col.iter().zip(buf_col.iter_mut()) {
                    *b += c * mat_val;
                }
            }
        }
    }

    /// Matrix product `self × other`, allocating the result.
    pub fn multiply(&self, other: &Matrix) -> TransformResult<Matrix> {
        if self.ncols != other.nrows {
            return Err(TransformError::MismatchedDimension {
                argument: "matrix",
                expected: self.ncols,
                actual: other.nrows,
            });
        }
        let mut out = Matrix::zeros(self.nrows, other.ncols);
        for r in 0..self.nrows {
            for k in 0..self.ncols {
                let a = self[(r, k)];
                if a == 0.0 {
                    continue;
                }
                for c in 0..other.ncols {
                    out.data[r * other.ncols + c] += a * other[(k, c)];
                }
            }
        }
        Ok(out)
    }

    /// Replace `self` with `self × other`.
    ///
    /// The product is accumulated in a fresh buffer before being swapped in,
    /// so `other` may be a copy of `self`.
    pub fn multiply_in_place(&mut self, other: &Matrix) -> TransformResult<()> {
        *self = self.multiply(other)?;
        Ok(())
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&f64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.ncols;
        &self.data[start..start + self.ncols]
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Copy a `rows × cols` block starting at `(src_row, src_col)` into `dest`
    /// at `(dst_row, dst_col)`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_sub_matrix(
        &self,
        src_row: usize,
        src_col: usize,
        rows: usize,
        cols: usize,
        dst_row: usize,
        dst_col: usize,
        dest: &mut Matrix,
    ) -> TransformResult<()> {
        if src_row + rows > self.nrows
            || src_col + cols > self.ncols
            || dst_row + rows > dest.nrows
            || dst_col + cols > dest.ncols
        {
            return Err(TransformError::invalid_argument(format!(
                "Sub-matrix {rows}x{cols} does not fit: source {}x{} at ({src_row}, {src_col}), destination {}x{} at ({dst_row}, {dst_col})",
                self.nrows, self.ncols, dest.nrows, dest.ncols
            )));
        }
        for r in 0..rows {
            let src_start = (src_row + r) * self.ncols + src_col;
            let dst_start = (dst_row + r) * dest.ncols + dst_col;
            dest.data[dst_start..dst_start + cols]
                .copy_from_slice(&self.data[src_start..src_start + cols]);
        }
        Ok(())
    }

    /// Whether this is a square matrix whose last row is `[0, ..., 0, 1]`.
    pub fn is_affine(&self) -> bool {
        if self.nrows != self.ncols || self.nrows == 0 {
            return false;
        }
        let last = self.nrows - 1;
        self.row(last)
            .iter()
            .enumerate()
            .all(|(c, v)| *v == if c == last { 1.0 } else { 0.0 })
    }

    pub fn is_identity(&self) -> bool {
        self.is_identity_tol(0.0)
    }

    /// NaN elements are never within tolerance.
    pub fn is_identity_tol(&self, tolerance: f64) -> bool {
        if self.nrows != self.ncols {
            return false;
        }
        let tolerance = tolerance.abs();
        self.data.iter().enumerate().all(|(idx, v)| {
            let expected = if idx / self.ncols == idx % self.ncols { 1.0 } else { 0.0 };
            (v - expected).abs() <= tolerance
        })
    }

    /// Element-wise comparison; NaN equals NaN here.
    pub fn epsilon_equals(&self, other: &Matrix, tolerance: f64) -> bool {
        self.nrows == other.nrows
            && self.ncols == other.ncols
            && self.data.iter().zip(other.data.iter()).all(|(a, b)| {
                (a - b).abs() <= tolerance || a.to_bits() == b.to_bits()
            })
    }

    pub fn determinant(&self) -> TransformResult<f64> {
        if self.nrows() != self.ncols() {
            return Err(TransformError::invalid_argument(
                "determinant only defined for square matrices",
            ));
        }
        let n = self.nrows;
        let mut lu = self.data.clone();
        let mut det = 1.0;
        for k in 0..n {
            let pivot_row = (k..n)
                .max_by(|a, b| lu[a * n + k].abs().total_cmp(&lu[b * n + k].abs()))
                .unwrap_or(k);
            let pivot = lu[pivot_row * n + k];
            if pivot == 0.0 {
                return Ok(0.0);
            }
            if pivot_row != k {
                swap_rows(&mut lu, n, k, pivot_row);
                det = -det;
            }
            det *= pivot;
            for r in (k + 1)..n {
                let factor = lu[r * n + k] / pivot;
                for c in k..n {
                    lu[r * n + c] -= factor * lu[k * n + c];
                }
            }
        }
        Ok(det)
    }

    /// Inverse by LU decomposition with partial pivoting.
    pub fn invert(&self) -> TransformResult<Matrix> {
        if self.nrows != self.ncols {
            return Err(TransformError::noninvertible(format!(
                "{}x{} matrix is not square",
                self.nrows, self.ncols
            )));
        }
        self.solve(&Matrix::identity(self.nrows))
            .map_err(|_| TransformError::noninvertible("matrix is singular"))
    }

    /// Copy into a [faer::Mat] for the dense solvers.
    pub(crate) fn to_faer(&self) -> Mat<f64> {
        Mat::from_fn(self.nrows, self.ncols, |r, c| self[(r, c)])
    }

    pub(crate) fn from_faer(m: MatRef<'_, f64>) -> Self {
        let mut data = Vec::with_capacity(m.nrows() * m.ncols());
        for r in 0..m.nrows() {
            for c in 0..m.ncols() {
                data.push(m[(r, c)]);
            }
        }
        Self {
            data,
            nrows: m.nrows(),
            ncols: m.ncols(),
        }
    }

    /// Solve `self × X = rhs` for square `self`, by LU decomposition with partial pivoting.
    pub fn solve(&self, rhs: &Matrix) -> TransformResult<Matrix> {
        let n = self.nrows;
        if self.ncols != n {
            return Err(TransformError::invalid_argument("solve requires a square matrix"));
        }
        if rhs.nrows != n {
            return Err(TransformError::MismatchedDimension {
                argument: "rhs",
                expected: n,
                actual: rhs.nrows,
            });
        }
        let scale = self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let threshold = scale * f64::EPSILON * n as f64;

        let lu = self.to_faer().partial_piv_lu();
        let u = lu.U();
        if (0..n).any(|k| !(u[(k, k)].abs() > threshold)) {
            return Err(TransformError::invalid_argument("matrix is singular"));
        }
        let x = lu.solve(rhs.to_faer());
        Ok(Self::from_faer(x.as_ref()))
    }

    /// Least-squares solution of the over-determined system `self × X ≈ rhs`,
    /// by QR decomposition.
    pub fn least_squares(&self, rhs: &Matrix) -> TransformResult<Matrix> {
        let (rows, cols) = (self.nrows, self.ncols);
        if rhs.nrows != rows {
            return Err(TransformError::MismatchedDimension {
                argument: "rhs",
                expected: rows,
                actual: rhs.nrows,
            });
        }
        if rows < cols {
            return Err(TransformError::invalid_argument(format!(
                "Under-determined system: {rows} equations for {cols} unknowns"
            )));
        }

        let qr = self.to_faer().qr();
        let r = qr.thin_R();
        let scale = (0..cols).fold(0.0_f64, |acc, k| acc.max(r[(k, k)].abs()));
        if (0..cols).any(|k| !(r[(k, k)].abs() > scale * 1e-13)) {
            return Err(TransformError::invalid_argument("matrix is rank deficient"));
        }
        let x = qr.solve_lstsq(rhs.to_faer());
        Ok(Self::from_faer(x.as_ref()))
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.nrows {
            for v in self.row(r) {
                write!(f, "{v:>14.6}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn swap_rows(data: &mut [f64], ncols: usize, a: usize, b: usize) {
    if a == b {
        return;
    }
    for c in 0..ncols {
        data.swap(a * ncols + c, b * ncols + c);
    }
}

#[derive(Debug, Clone)]
pub struct MatrixBuilder {
    row_vecs: bool,
    dim_len: Option<usize>,
    data: Vec<f64>,
}

impl MatrixBuilder {
    fn new(row_vecs: bool) -> Self {
        Self {
            row_vecs,
            dim_len: None,
            data: Default::default(),
        }
    }

    pub fn add_vec(&mut self, vec: &[f64]) -> TransformResult<&mut Self> {
        if let Some(len) = self.dim_len {
            if len != vec.len() {
                return Err(TransformError::invalid_argument(format!(
                    "MatrixBuilder: inconsistent vector length {}, expected {}",
                    vec.len(),
                    len
                )));
            }
        } else {
            self.dim_len = Some(vec.len());
        }
        self.data.extend_from_slice(vec);
        Ok(self)
    }

    pub fn build(self) -> TransformResult<Matrix> {
        let dim_len = self.dim_len.unwrap_or(0);
        if self.row_vecs {
            Matrix::try_new(self.data, dim_len)
        } else {
            Matrix::try_new_colmaj(self.data, dim_len)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::init_logger;
    use crate::{as_muts, as_refs, vec_of_vec};

    use super::*;
    use approx::{assert_relative_eq, assert_ulps_eq};
    use faer::rand::SeedableRng;
    use faer::stats::prelude::{Rng, SmallRng};

    fn new_rng() -> SmallRng {
        SmallRng::seed_from_u64(1991)
    }

    fn random_matrix(rng: &mut SmallRng, ndim: usize) -> Matrix {
        let data = (0..ndim * ndim).map(|_| rng.random::<f64>() * 10.0).collect();
        Matrix::try_new(data, ndim).unwrap()
    }

    #[test]
    fn test_determinant() {
        let mut rng = new_rng();
        for idx in 0..100 {
            let ndim = idx / 10 + 1;
            let my_mat = random_matrix(&mut rng, ndim);
            let my_det = my_mat.determinant().unwrap();

            let faer_mat = faer::Mat::from_fn(my_mat.nrows(), my_mat.ncols(), |row, col| {
                my_mat[(row, col)]
            });
            let faer_det = faer_mat.determinant();
            log::debug!("iteration={idx}, ndim={ndim}, my_det={my_det}, faer_det={faer_det}");
            assert_relative_eq!(my_det, faer_det, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_invert_recovers_identity() {
        let mut rng = new_rng();
        for ndim in 1..8 {
            let m = random_matrix(&mut rng, ndim);
            let inv = m.invert().unwrap();
            let product = m.multiply(&inv).unwrap();
            assert!(product.is_identity_tol(1e-9), "{product}");
        }
    }

    #[test]
    fn test_solve_satisfies_system() {
        let mut rng = new_rng();
        for ndim in 1..8 {
            let a = random_matrix(&mut rng, ndim);
            let b = Matrix::try_new((0..ndim * 2).map(|_| rng.random::<f64>()).collect(), 2)
                .unwrap();
            let x = a.solve(&b).unwrap();
            let back = a.multiply(&x).unwrap();
            assert!(back.epsilon_equals(&b, 1e-9), "{back}");
        }
    }

    #[test]
    fn test_solve_singular() {
        #[rustfmt::skip]
        let m = Matrix::try_new(vec![
            1.0, 2.0, 3.0,
            2.0, 4.0, 6.0,
            0.0, 1.0, 1.0,
        ], 3).unwrap();
        let err = m.solve(&Matrix::identity(3)).unwrap_err();
        assert_eq!(err.to_string(), "matrix is singular");
    }

    #[test]
    fn test_least_squares_rank_deficient() {
        // second column is twice the first
        let a = Matrix::from_rows(&[[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]]).unwrap();
        let b = Matrix::try_new(vec![1.0, 2.0, 3.0], 1).unwrap();
        let err = a.least_squares(&b).unwrap_err();
        assert_eq!(err.to_string(), "matrix is rank deficient");
    }

    #[test]
    fn test_least_squares_minimises_residual() {
        // noisy samples of y = 1 - 2x, normal equations solved independently
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.1, -1.0, -2.9, -5.1];
        let a = Matrix::from_rows(&xs.iter().map(|x| [1.0, *x]).collect::<Vec<_>>()).unwrap();
        let b = Matrix::try_new(ys.to_vec(), 1).unwrap();
        let sol = a.least_squares(&b).unwrap();

        let n = xs.len() as f64;
        let sx: f64 = xs.iter().sum();
        let sy: f64 = ys.iter().sum();
        let sxx: f64 = xs.iter().map(|x| x * x).sum();
        let sxy: f64 = xs.iter().zip(ys.iter()).map(|(x, y)| x * y).sum();
        let slope = (n * sxy - sx * sy) / (n * sxx - sx * sx);
        let intercept = (sy - slope * sx) / n;
        assert_relative_eq!(sol[(0, 0)], intercept, epsilon = 1e-12);
        assert_relative_eq!(sol[(1, 0)], slope, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_matrix_is_noninvertible() {
        #[rustfmt::skip]
        let m = Matrix::try_new(vec![
            1.0, 2.0,
            2.0, 4.0,
        ], 2).unwrap();
        assert!(matches!(
            m.invert(),
            Err(TransformError::NoninvertibleTransform(_))
        ));
    }

    #[test]
    fn test_multiply_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(matches!(
            a.multiply(&b),
            Err(TransformError::MismatchedDimension { .. })
        ));
    }

    #[test]
    fn test_multiply_in_place_with_own_copy() {
        #[rustfmt::skip]
        let mut m = Matrix::try_new(vec![
            1.0, 2.0,
            3.0, 4.0,
        ], 2).unwrap();
        let copy = m.clone();
        m.multiply_in_place(&copy).unwrap();
        assert_eq!(m, Matrix::try_new(vec![7.0, 10.0, 15.0, 22.0], 2).unwrap());
    }

    #[test]
    fn test_is_affine() {
        let mut m = Matrix::identity(3);
        m.set(0, 2, 5.0);
        assert!(m.is_affine());
        m.set(2, 0, 0.5);
        assert!(!m.is_affine());
        assert!(!Matrix::zeros(2, 3).is_affine());
    }

    #[test]
    fn test_copy_sub_matrix() {
        let src = Matrix::try_new((0..9).map(|v| v as f64).collect(), 3).unwrap();
        let mut dest = Matrix::zeros(3, 3);
        src.copy_sub_matrix(1, 1, 2, 2, 0, 0, &mut dest).unwrap();
        assert_eq!(dest.row(0), &[4.0, 5.0, 0.0]);
        assert_eq!(dest.row(1), &[7.0, 8.0, 0.0]);
        assert!(src.copy_sub_matrix(2, 2, 2, 2, 0, 0, &mut dest).is_err());
    }

    #[test]
    fn test_colmaj() {
        let m = Matrix::try_new_colmaj(vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0], 2).unwrap();
        assert_eq!(m.row(0), &[1.0, 2.0, 3.0]);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_least_squares_exact_fit() {
        // y = 2 + 3x sampled without noise
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let a = Matrix::from_rows(&xs.iter().map(|x| [1.0, *x]).collect::<Vec<_>>()).unwrap();
        let b = Matrix::try_new(xs.iter().map(|x| 2.0 + 3.0 * x).collect(), 1).unwrap();
        let sol = a.least_squares(&b).unwrap();
        assert_relative_eq!(sol[(0, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(sol[(1, 0)], 3.0, epsilon = 1e-12);
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
    fn test_matmul_columns_into() {
        init_logger();
        #[rustfmt::skip]
        let data = vec![
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0
        ];
        let mat = Matrix::try_new(data, 3).unwrap();

        let col_len = 5;
        let mut out = vec_of_vec(3, col_len, f64::NAN);
        let mut out_muts = as_muts(&mut out);

        let columns = vec![
            vec![10.0; col_len],
            vec![100.0; col_len],
            vec![1000.0; col_len],
        ];
        let col_refs = as_refs(&columns);

        mat.matmul_transposed_into(&col_refs, &mut out_muts);

        let expected: [f64; 3] = [3210.0, 6540.0, 9870.0];
        for idx in 0..col_len {
            let got: Vec<_> = out.iter().map(|c| c[idx]).collect();
            assert_ulps_eq!(got.as_slice(), expected.as_slice());
        }
    }
}
