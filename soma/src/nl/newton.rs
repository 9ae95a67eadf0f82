use na::DVector;
use serde::{Deserialize, Serialize};

use super::linsolve::{ConjugateGradient, LinearSolver, LinearSystem};
use super::NonLinearSystem;
use crate::{Diagnostics, Error, Real};

/// Parameters for the Newton solver.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewtonParams {
    /// Absolute residual tolerance.
    pub absolute_tolerance: f64,
    /// Relative residual tolerance, scaled by the initial residual norm.
    pub relative_tolerance: f64,
    /// Maximum number of Newton iterations permitted.
    pub max_iterations: u32,
    /// Initial forcing term for the inexact linear solves; `0` disables
    /// forcing-term control and keeps the inner tolerance fixed.
    pub forcing_term: f64,
    /// Safeguard constant for the forcing-term update.
    pub gamma: f64,
    /// Upper bound on the forcing term.
    pub eta_max: f64,
    /// Sufficient-decrease parameter of the Armijo condition.
    pub armijo_alpha: f64,
    /// Safeguarding bounds for the parabolic line-search model.
    pub sigma: [f64; 2],
    /// Maximum number of step length reductions in one line search.
    pub armijo_max: u32,
}

impl Default for NewtonParams {
    fn default() -> Self {
        NewtonParams {
            absolute_tolerance: 1e-3,
            relative_tolerance: 1e-6,
            max_iterations: 50,
            forcing_term: 0.9,
            gamma: 0.9,
            eta_max: 0.9,
            armijo_alpha: 1e-4,
            sigma: [0.1, 0.5],
            armijo_max: 30,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    MaximumIterationsExceeded,
    Diverged,
    NothingToSolve,
}

/// Outcome of one Newton solve.
///
/// Non-convergence is reported here rather than as an error; `x` keeps
/// whatever the last iterate was and the caller inspects `residual`
/// against `tolerance`.
#[derive(Debug)]
pub struct SolveResult {
    pub iterations: u32,
    /// Final residual 2-norm.
    pub residual: f64,
    /// Stopping tolerance used for this solve, derived from the initial
    /// residual norm.
    pub tolerance: f64,
    pub status: Status,
    pub diagnostics: Diagnostics,
}

type UpdateIterateFn<T> = Box<dyn Fn(&DVector<T>, &mut DVector<T>) + Send + Sync>;

/// Newton's method with an inexact-Newton forcing-term schedule and an
/// Armijo-Goldstein backtracking line search.
///
/// Each iteration solves the linearized system `J(x) dx = F(x)` with the
/// configured iterative [`LinearSolver`] and applies the iterate update
/// (by default `x ← x − dx`) through a safeguarded line search. When
/// forcing-term control is enabled the inner solve tolerance is relaxed
/// far from the root so the linear subproblem is not over-solved.
pub struct NewtonSolver<T: Real> {
    pub params: NewtonParams,
    linear_solver: Box<dyn LinearSolver<T>>,
    system: Option<NonLinearSystem<T>>,
    update_iterate: UpdateIterateFn<T>,
}

impl<T: Real> Default for NewtonSolver<T> {
    fn default() -> Self {
        NewtonSolver::new(NewtonParams::default())
    }
}

impl<T: Real> NewtonSolver<T> {
    pub fn new(params: NewtonParams) -> Self {
        NewtonSolver {
            params,
            linear_solver: Box::new(ConjugateGradient::default()),
            system: None,
            update_iterate: Box::new(|dx, x| *x += dx),
        }
    }

    pub fn set_system(&mut self, system: NonLinearSystem<T>) {
        self.system = Some(system);
    }

    pub fn system(&self) -> Option<&NonLinearSystem<T>> {
        self.system.as_ref()
    }

    pub fn set_linear_solver(&mut self, linear_solver: Box<dyn LinearSolver<T>>) {
        self.linear_solver = linear_solver;
    }

    /// Replaces the iterate-update strategy.
    ///
    /// The function receives the (already negated and scaled) step and the
    /// iterate to advance; the default adds them.
    pub fn set_update_iterate<F>(&mut self, update: F)
    where
        F: Fn(&DVector<T>, &mut DVector<T>) + Send + Sync + 'static,
    {
        self.update_iterate = Box::new(update);
    }

    /// Finds a root of the configured system starting from `x`, mutating
    /// it in place.
    ///
    /// A missing system or Jacobian fails with [`Error::Unconfigured`]
    /// before `x` is touched.
    pub fn solve(&mut self, x: &mut DVector<T>) -> Result<SolveResult, Error> {
        let NewtonSolver {
            ref params,
            ref mut linear_solver,
            ref system,
            ref update_iterate,
        } = *self;

        let system = system.as_ref().ok_or(Error::Unconfigured {
            what: "nonlinear system",
        })?;
        if !system.has_jacobian() {
            return Err(Error::Unconfigured { what: "jacobian" });
        }

        let mut diagnostics = Diagnostics::new();
        if x.is_empty() {
            return Ok(SolveResult {
                iterations: 0,
                residual: 0.0,
                tolerance: 0.0,
                status: Status::NothingToSolve,
                diagnostics,
            });
        }

        let n = x.len();
        let mut r = DVector::zeros(n);
        let mut fnorm = system.residual_norm(x, &mut r);

        // The stopping tolerance is pinned to the initial residual norm
        // and not recomputed per iteration.
        let stop_tolerance =
            params.absolute_tolerance + params.relative_tolerance * fnorm;
        linear_solver.set_tolerance(stop_tolerance);

        let mut forcing_term = params.forcing_term;
        let mut dx = DVector::zeros(n);
        let mut step = DVector::zeros(n);
        let mut x_prev = DVector::zeros(n);

        log::debug!("    i |   res-2    |  lin # |  lin err   |   eta      | ls # ");

        let mut iterations = 0;
        let status = loop {
            if fnorm < stop_tolerance {
                break Status::Success;
            }
            if !fnorm.is_finite() {
                diagnostics.error(format!(
                    "Newton residual diverged at iteration {}",
                    iterations
                ));
                break Status::Diverged;
            }
            if iterations >= params.max_iterations {
                break Status::MaximumIterationsExceeded;
            }

            // Refresh the Jacobian and assemble the linearized system.
            let jacobian = system.jacobian(x).expect("jacobian presence checked");
            if jacobian.rows() == 0 {
                return Err(Error::InvalidDimension {
                    what: "jacobian",
                    expected: n,
                    actual: 0,
                });
            }
            if jacobian.rows() != n {
                return Err(Error::InvalidDimension {
                    what: "jacobian",
                    expected: n,
                    actual: jacobian.rows(),
                });
            }
            let linear_system = LinearSystem::new(jacobian, r.clone())?;

            // The previous step warm-starts the inner solve.
            let lin_result = linear_solver.solve(&linear_system, &mut dx);

            if !num_traits::Float::is_finite(dx.norm_squared()) {
                diagnostics.error("linear solve produced a non-finite step".to_string());
                break Status::Diverged;
            }

            x_prev.copy_from(x);

            // Take the full step x ← x − dx, then let the line search
            // shrink it if the residual does not decrease enough.
            step.copy_from(&dx);
            step.neg_mut();
            update_iterate(&step, x);

            let (new_norm, ls_count) = armijo(
                params,
                system,
                update_iterate,
                &dx,
                x,
                &x_prev,
                fnorm,
                &mut r,
                &mut step,
                &mut diagnostics,
            );

            iterations += 1;
            log::debug!(
                "{:>5} | {:10.3e} | {:>6} | {:10.3e} | {:10.3e} | {:>4}",
                iterations,
                new_norm,
                lin_result.iterations,
                lin_result.error,
                forcing_term,
                ls_count
            );

            if forcing_term > 0.0 && new_norm > stop_tolerance {
                // Ratio of successive residual norms drives the next
                // forcing term; the linear tolerance follows it so the
                // inner solve is only as accurate as the outer iterate
                // deserves.
                let ratio = new_norm / fnorm;
                forcing_term =
                    updated_forcing_term(params, forcing_term, ratio, stop_tolerance, fnorm);
                linear_solver.set_tolerance(forcing_term);
            }

            fnorm = new_norm;
        };

        Ok(SolveResult {
            iterations,
            residual: fnorm,
            tolerance: stop_tolerance,
            status,
            diagnostics,
        })
    }
}

/// Forcing term update of Eisenstat-Walker type: `η = γ·ratio²`, kept from
/// collapsing while far from the root and clamped between the remaining
/// tolerance budget and `η_max`.
fn updated_forcing_term(
    params: &NewtonParams,
    forcing_term: f64,
    ratio: f64,
    stop_tolerance: f64,
    fnorm: f64,
) -> f64 {
    let mut eta = params.gamma * ratio * ratio;
    let forcing_term_sqr = forcing_term * forcing_term;
    if params.gamma * forcing_term_sqr > 0.1 {
        eta = eta.max(params.gamma * forcing_term_sqr);
    }
    eta.min(params.eta_max).max(0.5 * stop_tolerance / fnorm)
}

/// Backtracking line search enforcing the Armijo-Goldstein sufficient
/// decrease condition `‖F(x − λ·dx)‖² ≤ (1 − α·λ)·‖F(x)‖²`.
///
/// On entry `x` holds the full step (`λ = 1`). Shrunk step lengths come
/// from a three-point safeguarded parabolic model clamped to
/// `[σ0·λ, σ1·λ]`. After `armijo_max` failed reductions the best step
/// found is kept. Returns the accepted residual norm and the number of
/// residual evaluations spent.
#[allow(clippy::too_many_arguments)]
fn armijo<T: Real>(
    params: &NewtonParams,
    system: &NonLinearSystem<T>,
    update_iterate: &UpdateIterateFn<T>,
    dx: &DVector<T>,
    x: &mut DVector<T>,
    x_base: &DVector<T>,
    previous_fnorm: f64,
    r: &mut DVector<T>,
    step: &mut DVector<T>,
    diagnostics: &mut Diagnostics,
) -> (f64, u32) {
    let mut take_step = |lambda: f64, x: &mut DVector<T>| {
        x.copy_from(x_base);
        step.copy_from(dx);
        *step *= T::from(-lambda).unwrap();
        update_iterate(step, x);
    };

    let mut current_fnorm = system.residual_norm(x, r);
    let ff0 = previous_fnorm * previous_fnorm;
    if current_fnorm * current_fnorm <= (1.0 - params.armijo_alpha) * ff0 {
        return (current_fnorm, 1);
    }

    let mut lambda_c = 1.0;
    let mut lambda_m = 1.0;
    let mut ffc = current_fnorm * current_fnorm;
    let mut ffm = ffc;

    let mut best_lambda = 1.0;
    let mut best_fnorm = current_fnorm;

    let mut evaluations = 1;
    for _ in 0..params.armijo_max {
        let lambda = parabolic_model(params.sigma, [ff0, ffc, ffm], [lambda_c, lambda_m]);
        lambda_m = lambda_c;
        ffm = ffc;
        lambda_c = lambda;

        take_step(lambda, x);
        current_fnorm = system.residual_norm(x, r);
        ffc = current_fnorm * current_fnorm;
        evaluations += 1;

        if current_fnorm < best_fnorm {
            best_fnorm = current_fnorm;
            best_lambda = lambda;
        }
        if ffc <= (1.0 - params.armijo_alpha * lambda) * ff0 {
            return (current_fnorm, evaluations);
        }
    }

    diagnostics.warn(format!(
        "line search gave up after {} reductions; keeping step length {:.3e}",
        params.armijo_max, best_lambda
    ));
    take_step(best_lambda, x);
    let fnorm = system.residual_norm(x, r);
    (fnorm, evaluations + 1)
}

/// Three-point safeguarded parabolic model for the next step length.
///
/// Fits a parabola through `(0, ff0)`, `(λc, ffc)`, `(λm, ffm)` and
/// returns its minimizer clamped to `[σ0·λc, σ1·λc]`; a concave-up
/// degenerate fit falls back to the upper safeguard.
fn parabolic_model(sigma: [f64; 2], fnorm_sqr: [f64; 3], lambda: [f64; 2]) -> f64 {
    let [ff0, ffc, ffm] = fnorm_sqr;
    let [lambda_c, lambda_m] = lambda;

    let c2 = lambda_m * (ffc - ff0) - lambda_c * (ffm - ff0);
    if c2 >= 0.0 {
        return sigma[1] * lambda_c;
    }
    let c1 = lambda_c * lambda_c * (ffm - ff0) - lambda_m * lambda_m * (ffc - ff0);
    (-c1 * 0.5 / c2).clamp(sigma[0] * lambda_c, sigma[1] * lambda_c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nl::linsolve::ForwardGaussSeidel;
    use sprs::TriMat;

    #[test]
    fn unset_system_is_rejected_without_touching_x() {
        let mut solver = NewtonSolver::<f64>::default();
        let mut x = na::DVector::from_vec(vec![1.0, 2.0]);
        let err = solver.solve(&mut x).unwrap_err();
        assert!(matches!(err, Error::Unconfigured { .. }));
        assert_eq!(x.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn missing_jacobian_is_rejected() {
        let mut solver = NewtonSolver::<f64>::default();
        solver.set_system(NonLinearSystem::new(|x, out| out.copy_from(x)));
        let mut x = na::DVector::from_vec(vec![1.0]);
        let err = solver.solve(&mut x).unwrap_err();
        assert!(matches!(err, Error::Unconfigured { what: "jacobian" }));
        assert_eq!(x.as_slice(), &[1.0]);
    }

    #[test]
    fn empty_iterate_is_a_noop() {
        let mut solver = NewtonSolver::<f64>::default();
        solver.set_system(
            NonLinearSystem::new(|x, out| out.copy_from(x))
                .with_jacobian(|_| TriMat::new((0, 0)).to_csr()),
        );
        let mut x = na::DVector::zeros(0);
        let result = solver.solve(&mut x).unwrap();
        assert_eq!(result.status, Status::NothingToSolve);
    }

    #[test]
    fn scalar_square_root() {
        // F(x) = x² − 2 has a root at √2; the line search keeps the
        // iteration stable from a poor starting point.
        let mut solver = NewtonSolver::<f64>::new(NewtonParams {
            absolute_tolerance: 1e-10,
            relative_tolerance: 1e-12,
            ..Default::default()
        });
        solver.set_linear_solver(Box::new(ForwardGaussSeidel::new(100, 1e-12)));
        solver.set_system(
            NonLinearSystem::new(|x: &na::DVector<f64>, out: &mut na::DVector<f64>| {
                out[0] = x[0] * x[0] - 2.0;
            })
            .with_jacobian(|x| {
                let mut tri = TriMat::new((1, 1));
                tri.add_triplet(0, 0, 2.0 * x[0]);
                tri.to_csr()
            }),
        );

        let mut x = na::DVector::from_vec(vec![10.0]);
        let result = solver.solve(&mut x).unwrap();
        assert_eq!(result.status, Status::Success);
        assert!((x[0] - std::f64::consts::SQRT_2).abs() < 1e-6);
        assert!(result.residual < result.tolerance);
    }

    #[test]
    fn custom_update_iterate_is_used() {
        // Clamping update: never lets the iterate go negative.
        let mut solver = NewtonSolver::<f64>::new(NewtonParams {
            absolute_tolerance: 1e-10,
            ..Default::default()
        });
        solver.set_linear_solver(Box::new(ForwardGaussSeidel::new(100, 1e-12)));
        solver.set_update_iterate(|dx, x| {
            *x += dx;
            x.apply(|v| *v = v.max(0.0));
        });
        solver.set_system(
            NonLinearSystem::new(|x: &na::DVector<f64>, out: &mut na::DVector<f64>| {
                out[0] = x[0] * x[0] - 4.0;
            })
            .with_jacobian(|x| {
                let mut tri = TriMat::new((1, 1));
                tri.add_triplet(0, 0, 2.0 * x[0]);
                tri.to_csr()
            }),
        );
        let mut x = na::DVector::from_vec(vec![5.0]);
        let result = solver.solve(&mut x).unwrap();
        assert_eq!(result.status, Status::Success);
        assert!((x[0] - 2.0).abs() < 1e-6);
    }
}
