use na::DVector;

use super::{spmv, LinearSolver, LinearSystem, SolveResult, Status};
use crate::Real;

/// Conjugate gradient for symmetric positive (semi-)definite systems.
///
/// Unpreconditioned. Failing to converge within the iteration budget is
/// not an error; the caller gets the best iterate together with the final
/// residual norm and decides.
#[derive(Clone, Debug)]
pub struct ConjugateGradient {
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl ConjugateGradient {
    pub fn new(max_iterations: u32, tolerance: f64) -> Self {
        ConjugateGradient {
            max_iterations,
            tolerance,
        }
    }
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        // Matches the caps used by the Newton solver's inner solve.
        ConjugateGradient::new(100, 1e-8)
    }
}

impl<T: Real> LinearSolver<T> for ConjugateGradient {
    fn solve(&mut self, system: &LinearSystem<T>, x: &mut DVector<T>) -> SolveResult {
        let n = system.size();
        if n == 0 {
            return SolveResult::default();
        }

        let b = system.rhs();
        let b_norm_sq = b.norm_squared().to_f64().unwrap();

        // The solution of a zero rhs is trivial.
        if b_norm_sq == 0.0 {
            x.fill(T::zero());
            return SolveResult::default();
        }

        let tol_sq = b_norm_sq * self.tolerance * self.tolerance;

        // r = b - A x
        let mut r = DVector::zeros(n);
        spmv(system.matrix(), x, &mut r);
        r.zip_apply(b, |ri, bi| *ri = bi - *ri);

        let mut p = r.clone();
        let mut ap = DVector::zeros(n);
        let mut r_norm_sq = r.norm_squared();

        let mut iterations = 0;
        loop {
            let r_norm_sq_f64 = r_norm_sq.to_f64().unwrap();
            if r_norm_sq_f64 <= tol_sq {
                let residual = r_norm_sq_f64.sqrt();
                break SolveResult {
                    iterations,
                    residual,
                    error: residual / b_norm_sq.sqrt(),
                    status: Status::Success,
                };
            }
            if iterations >= self.max_iterations {
                let residual = r_norm_sq_f64.sqrt();
                break SolveResult {
                    iterations,
                    residual,
                    error: residual / b_norm_sq.sqrt(),
                    status: Status::MaximumIterationsExceeded,
                };
            }

            spmv(system.matrix(), &p, &mut ap);
            let p_ap = p.dot(&ap);
            if p_ap == T::zero() {
                // Breakdown: the search direction has no curvature left.
                let residual = r_norm_sq_f64.sqrt();
                break SolveResult {
                    iterations,
                    residual,
                    error: residual / b_norm_sq.sqrt(),
                    status: Status::SingularMatrix,
                };
            }

            let alpha = r_norm_sq / p_ap;
            x.axpy(alpha, &p, T::one());
            r.axpy(-alpha, &ap, T::one());

            let r_norm_sq_next = r.norm_squared();
            let beta = r_norm_sq_next / r_norm_sq;
            // p = r + beta * p
            p.axpy(T::one(), &r, beta);
            r_norm_sq = r_norm_sq_next;

            iterations += 1;
        }
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn set_max_iterations(&mut self, max_iterations: u32) {
        self.max_iterations = max_iterations;
    }
}
