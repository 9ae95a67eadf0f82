use na::DVector;
use sprs::CsMatView;

use super::{residual_norm, LinearSolver, LinearSystem, SolveResult, Status};
use crate::Real;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Sweep {
    Forward,
    Backward,
}

/// One Gauss-Seidel sweep over `x` in the given index order.
///
/// Each unknown is updated from the most recently written values of its
/// neighbors. Rows with a zero (or missing) diagonal are left untouched;
/// singular systems are not detected here.
fn gauss_seidel_sweep<T: Real>(a: CsMatView<T>, b: &DVector<T>, x: &mut DVector<T>, sweep: Sweep) {
    let n = b.len();
    let mut update_row = |i: usize| {
        let row = a.outer_view(i).expect("row index in range");
        let mut sum = T::zero();
        let mut diag = T::zero();
        for (j, &v) in row.iter() {
            if j == i {
                diag = v;
            } else {
                sum += v * x[j];
            }
        }
        if diag != T::zero() {
            x[i] = (b[i] - sum) / diag;
        }
    };
    match sweep {
        Sweep::Forward => (0..n).for_each(&mut update_row),
        Sweep::Backward => (0..n).rev().for_each(&mut update_row),
    }
}

fn solve_stationary<T: Real>(
    system: &LinearSystem<T>,
    x: &mut DVector<T>,
    sweep: Sweep,
    weight: f64,
    tolerance: f64,
    max_iterations: u32,
) -> SolveResult {
    if system.size() == 0 {
        return SolveResult::default();
    }

    let b = system.rhs();
    let b_norm = b.norm().to_f64().unwrap();
    if b_norm == 0.0 {
        x.fill(T::zero());
        return SolveResult::default();
    }
    let tol_abs = tolerance * b_norm;

    let mut old = DVector::zeros(x.len());
    let mut iterations = 0;
    loop {
        // SOR blends the completed sweep with the previous iterate; with a
        // unit weight the sweep result is kept as is, which is exactly
        // plain Gauss-Seidel.
        if weight != 1.0 {
            old.copy_from(x);
        }
        gauss_seidel_sweep(system.matrix(), b, x, sweep);
        if weight != 1.0 {
            let w = T::from(weight).unwrap();
            let one_minus_w = T::from(1.0 - weight).unwrap();
            x.zip_apply(&old, |xi, oi| *xi = w * *xi + one_minus_w * oi);
        }
        iterations += 1;

        let residual = residual_norm(system.matrix(), b, x);
        if residual <= tol_abs {
            break SolveResult {
                iterations,
                residual,
                error: residual / b_norm,
                status: Status::Success,
            };
        }
        if iterations >= max_iterations {
            break SolveResult {
                iterations,
                residual,
                error: residual / b_norm,
                status: Status::MaximumIterationsExceeded,
            };
        }
    }
}

macro_rules! stationary_solver {
    ($(#[$doc:meta])* $name:ident, $sweep:expr, sor) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug)]
        pub struct $name {
            pub max_iterations: u32,
            pub tolerance: f64,
            weight: f64,
        }

        impl $name {
            pub fn new(max_iterations: u32, tolerance: f64, weight: f64) -> Self {
                $name {
                    max_iterations,
                    tolerance,
                    weight,
                }
            }

            /// Relaxation weight; must lie in `(0, 2)` for convergence.
            pub fn weight(&self) -> f64 {
                self.weight
            }

            pub fn set_weight(&mut self, weight: f64) {
                self.weight = weight;
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::new(100, 1e-8, 0.9)
            }
        }

        impl<T: Real> LinearSolver<T> for $name {
            fn solve(&mut self, system: &LinearSystem<T>, x: &mut DVector<T>) -> SolveResult {
                solve_stationary(
                    system,
                    x,
                    $sweep,
                    self.weight,
                    self.tolerance,
                    self.max_iterations,
                )
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
    };
    ($(#[$doc:meta])* $name:ident, $sweep:expr) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug)]
        pub struct $name {
            pub max_iterations: u32,
            pub tolerance: f64,
        }

        impl $name {
            pub fn new(max_iterations: u32, tolerance: f64) -> Self {
                $name {
                    max_iterations,
                    tolerance,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::new(100, 1e-8)
            }
        }

        impl<T: Real> LinearSolver<T> for $name {
            fn solve(&mut self, system: &LinearSystem<T>, x: &mut DVector<T>) -> SolveResult {
                solve_stationary(system, x, $sweep, 1.0, self.tolerance, self.max_iterations)
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
    };
}

stationary_solver!(
    /// Gauss-Seidel with sweeps in ascending index order.
    ForwardGaussSeidel,
    Sweep::Forward
);
stationary_solver!(
    /// Gauss-Seidel with sweeps in descending index order.
    BackwardGaussSeidel,
    Sweep::Backward
);
stationary_solver!(
    /// Successive over-relaxation on top of forward Gauss-Seidel sweeps.
    ///
    /// The relaxation is applied to the result of a whole sweep,
    /// `x = w·x_gs + (1 − w)·x_old`, rather than per unknown inside the
    /// sweep.
    ForwardSor,
    Sweep::Forward,
    sor
);
stationary_solver!(
    /// Successive over-relaxation on top of backward Gauss-Seidel sweeps.
    ///
    /// See [`ForwardSor`] for the blending formula.
    BackwardSor,
    Sweep::Backward,
    sor
);

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn small_system() -> LinearSystem<f64> {
        // Diagonally dominant, so plain Gauss-Seidel converges.
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 0, 4.0);
        tri.add_triplet(0, 1, -1.0);
        tri.add_triplet(1, 0, -1.0);
        tri.add_triplet(1, 1, 4.0);
        tri.add_triplet(1, 2, -1.0);
        tri.add_triplet(2, 1, -1.0);
        tri.add_triplet(2, 2, 4.0);
        let b = na::DVector::from_vec(vec![1.0, 2.0, 3.0]);
        LinearSystem::new(tri.to_csr(), b).unwrap()
    }

    #[test]
    fn forward_gauss_seidel_solves() {
        let system = small_system();
        let mut x = na::DVector::zeros(3);
        let result =
            LinearSolver::solve(&mut ForwardGaussSeidel::new(100, 1e-12), &system, &mut x);
        assert_eq!(result.status, Status::Success);
        assert!(residual_norm(system.matrix(), system.rhs(), &x) < 1e-10);
    }

    #[test]
    fn backward_gauss_seidel_solves() {
        let system = small_system();
        let mut x = na::DVector::zeros(3);
        let result =
            LinearSolver::solve(&mut BackwardGaussSeidel::new(100, 1e-12), &system, &mut x);
        assert_eq!(result.status, Status::Success);
        assert!(residual_norm(system.matrix(), system.rhs(), &x) < 1e-10);
    }

    #[test]
    fn unit_weight_sor_matches_gauss_seidel_exactly() {
        let system = small_system();

        let mut x_gs = na::DVector::zeros(3);
        LinearSolver::solve(&mut ForwardGaussSeidel::new(7, 1e-30), &system, &mut x_gs);

        let mut x_sor = na::DVector::zeros(3);
        LinearSolver::solve(&mut ForwardSor::new(7, 1e-30, 1.0), &system, &mut x_sor);

        // Same arithmetic path, so the outputs are bit-identical.
        assert_eq!(x_gs.as_slice(), x_sor.as_slice());
    }

    #[test]
    fn relaxed_sor_converges() {
        let system = small_system();
        let mut x = na::DVector::zeros(3);
        let result =
            LinearSolver::solve(&mut BackwardSor::new(200, 1e-12, 1.2), &system, &mut x);
        assert_eq!(result.status, Status::Success);
        assert!(residual_norm(system.matrix(), system.rhs(), &x) < 1e-10);
    }

    #[test]
    fn empty_system_is_a_noop() {
        let system =
            LinearSystem::<f64>::new(TriMat::new((0, 0)).to_csr(), na::DVector::zeros(0)).unwrap();
        let mut x = na::DVector::zeros(0);
        let result = LinearSolver::solve(&mut ForwardGaussSeidel::default(), &system, &mut x);
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.iterations, 0);
    }
}
