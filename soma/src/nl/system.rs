use na::DVector;
use sprs::CsMat;

use crate::Real;

type ResidualFn<T> = Box<dyn Fn(&DVector<T>, &mut DVector<T>) + Send + Sync>;
type JacobianFn<T> = Box<dyn Fn(&DVector<T>) -> CsMat<T> + Send + Sync>;

/// A system of nonlinear equations `F(x) = 0`.
///
/// Holds the residual function and, optionally, its Jacobian. Both are
/// plain closures supplied by the owning dynamical model; the Newton
/// solver borrows the system for the duration of a solve.
pub struct NonLinearSystem<T: Real> {
    residual: ResidualFn<T>,
    jacobian: Option<JacobianFn<T>>,
}

impl<T: Real> NonLinearSystem<T> {
    /// Creates a system from a residual function writing `F(x)` into its
    /// output argument.
    pub fn new<F>(residual: F) -> Self
    where
        F: Fn(&DVector<T>, &mut DVector<T>) + Send + Sync + 'static,
    {
        NonLinearSystem {
            residual: Box::new(residual),
            jacobian: None,
        }
    }

    /// Attaches the Jacobian function `x ↦ ∂F/∂x` producing a CSR matrix.
    pub fn with_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&DVector<T>) -> CsMat<T> + Send + Sync + 'static,
    {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    pub fn has_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }

    /// Evaluates `F(x)` into `out`.
    pub fn residual(&self, x: &DVector<T>, out: &mut DVector<T>) {
        (self.residual)(x, out);
    }

    /// Evaluates `F(x)` and returns its 2-norm, using `out` as scratch.
    pub fn residual_norm(&self, x: &DVector<T>, out: &mut DVector<T>) -> f64 {
        self.residual(x, out);
        out.norm().to_f64().unwrap()
    }

    pub(crate) fn jacobian(&self, x: &DVector<T>) -> Option<CsMat<T>> {
        self.jacobian.as_ref().map(|j| j(x))
    }
}
