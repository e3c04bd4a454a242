//! Linear algebra utilities.

use thiserror::Error;

/// Raised when elimination meets a pivot that is numerically zero.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Zero pivot encountered at row {row}")]
pub struct SingularMatrix {
    pub row: usize,
}

/// Solve the dense system `Ax = b` in place by LU decomposition with partial pivoting.
///
/// `a` is an `n x n` matrix in row-major order, where `n = b.len()`. On return `a`
/// holds the LU factors (rows permuted) and `b` holds the solution. Nothing is
/// allocated, so the routine can run inside a timestep.
///
/// # Example
/// ```
/// use catchment_core::utils::linear_algebra::lu_solve_inplace;
///
/// let mut a = vec![
///     0.0, 2.0, //
///     1.0, 1.0,
/// ];
/// let mut b = vec![4.0, 3.0];
/// lu_solve_inplace(&mut a, &mut b).unwrap();
/// assert!((b[0] - 1.0).abs() < 1e-12);
/// assert!((b[1] - 2.0).abs() < 1e-12);
/// ```
pub fn lu_solve_inplace(a: &mut [f64], b: &mut [f64]) -> Result<(), SingularMatrix> {
    let n = b.len();
    assert_eq!(a.len(), n * n, "a must be a square matrix matching b");

    for col in 0..n {
        // Partial pivoting
        let mut pivot = col;
        for row in col + 1..n {
            if a[row * n + col].abs() > a[pivot * n + col].abs() {
                pivot = row;
            }
        }
        if a[pivot * n + col].abs() < 1e-15 {
            return Err(SingularMatrix { row: col });
        }
        if pivot != col {
            for k in 0..n {
                a.swap(col * n + k, pivot * n + k);
            }
            b.swap(col, pivot);
        }

        let diagonal = a[col * n + col];
        for row in col + 1..n {
            let factor = a[row * n + col] / diagonal;
            a[row * n + col] = factor;
            for k in col + 1..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row * n + k] * b[k];
        }
        b[row] = sum / a[row * n + row];
    }
    Ok(())
}
