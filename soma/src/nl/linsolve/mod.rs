mod cg;
mod gauss_seidel;

pub use cg::*;
pub use gauss_seidel::*;

use na::DVector;
use sprs::{CsMat, CsMatView};
use thiserror::Error;

use crate::{Error as ConfigError, Real};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error, Default)]
pub enum Status {
    #[default]
    #[error("Success")]
    Success,
    #[error("Maximum number of linear solver iterations exceeded")]
    MaximumIterationsExceeded,
    #[error("Singular matrix detected")]
    SingularMatrix,
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct SolveResult {
    /// Number of iterations of an iterative solver.
    pub iterations: u32,
    /// Absolute residual 2-norm.
    pub residual: f64,
    /// Relative residual 2-norm.
    ///
    /// Residual divided by the norm of the right-hand-side.
    pub error: f64,
    /// Final status of the linear solve.
    pub status: Status,
}

/// A square sparse system `A x = b`.
///
/// The matrix is stored in CSR form so the stationary solvers can sweep
/// rows in place.
pub struct LinearSystem<T> {
    a: CsMat<T>,
    b: DVector<T>,
}

impl<T: Real> LinearSystem<T> {
    pub fn new(a: CsMat<T>, b: DVector<T>) -> Result<Self, ConfigError> {
        if a.rows() != a.cols() {
            return Err(ConfigError::InvalidDimension {
                what: "linear system matrix",
                expected: a.rows(),
                actual: a.cols(),
            });
        }
        if a.rows() != b.len() {
            return Err(ConfigError::InvalidDimension {
                what: "linear system rhs",
                expected: a.rows(),
                actual: b.len(),
            });
        }
        // No-op for matrices already in CSR form.
        let a = a.into_csr();
        Ok(LinearSystem { a, b })
    }

    pub fn matrix(&self) -> CsMatView<T> {
        self.a.view()
    }

    pub fn rhs(&self) -> &DVector<T> {
        &self.b
    }

    pub fn size(&self) -> usize {
        self.b.len()
    }
}

/// Iterative solver for sparse linear systems.
///
/// Implementations mutate the caller's initial guess `x` in place and stop
/// after `max_iterations` sweeps or once the residual norm drops below
/// `tolerance * ‖b‖`. Exhausting the iteration budget is reported through
/// [`SolveResult::status`], never as a hard failure: callers inspect the
/// residual to decide what the iterate is worth.
pub trait LinearSolver<T: Real>: Send {
    fn solve(&mut self, system: &LinearSystem<T>, x: &mut DVector<T>) -> SolveResult;

    /// Relative residual tolerance, measured against the rhs norm.
    fn tolerance(&self) -> f64;
    fn set_tolerance(&mut self, tolerance: f64);

    fn max_iterations(&self) -> u32;
    fn set_max_iterations(&mut self, max_iterations: u32);
}

/// `out = A x`.
pub(crate) fn spmv<T: Real>(a: CsMatView<T>, x: &DVector<T>, out: &mut DVector<T>) {
    for (row, out_i) in a.outer_iterator().zip(out.iter_mut()) {
        let mut sum = T::zero();
        for (j, &v) in row.iter() {
            sum += v * x[j];
        }
        *out_i = sum;
    }
}

/// 2-norm of `b - A x`.
pub(crate) fn residual_norm<T: Real>(a: CsMatView<T>, b: &DVector<T>, x: &DVector<T>) -> f64 {
    let mut norm_sq = 0.0;
    for (row, &b_i) in a.outer_iterator().zip(b.iter()) {
        let mut sum = T::zero();
        for (j, &v) in row.iter() {
            sum += v * x[j];
        }
        let r = (b_i - sum).to_f64().unwrap();
        norm_sq += r * r;
    }
    norm_sq.sqrt()
}
