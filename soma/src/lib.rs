//! Numerical core for interactive deformable-body simulation.
//!
//! The crate is organized around three subsystems:
//!
//! - [`pbd`]: position-based (PBD) and extended position-based (XPBD)
//!   constraint projection against shared particle buffers, with
//!   partitioned data-parallel sweeps and a per-pair collision solver.
//! - [`nl`]: a Newton solver with inexact-Newton forcing-term control and
//!   Armijo backtracking, driving a family of iterative linear solvers
//!   (Gauss-Seidel, SOR, conjugate gradient) over sparse systems.
//! - [`geometry`]: tetrahedral mesh queries (surface extraction,
//!   barycentric weights), triangle closest-point queries and grid-based
//!   neighbor search, which together feed constraint generation.
//!
//! Position and inverse-mass buffers are owned by the caller; solvers
//! borrow them for the duration of a solve and mutate positions in place.

pub mod diagnostics;
pub mod geometry;
pub mod nl;
pub mod pbd;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};

/// 3D vector used by the particle buffers and geometric queries.
pub type Vec3 = na::Vector3<f64>;

use thiserror::Error;

/// Scalar type accepted by the generic solvers.
///
/// Combines nalgebra's field operations with the `num_traits` float
/// interface. Where both traits provide a method with the same name,
/// call sites disambiguate explicitly.
pub trait Real:
    Copy + Default + std::fmt::Debug + na::RealField + num_traits::Float + Send + Sync + 'static
{
}

impl<T> Real for T where
    T: Copy + Default + std::fmt::Debug + na::RealField + num_traits::Float + Send + Sync + 'static
{
}

/// Configuration errors surfaced by the solvers and geometric queries.
///
/// Non-convergence is deliberately not represented here: exhausting an
/// iteration budget leaves the best iterate in place and is reported as a
/// status on the corresponding result struct.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Solver is missing a required collaborator: {what}")]
    Unconfigured { what: &'static str },
    #[error("Invalid dimension for {what}: expected {expected}, got {actual}")]
    InvalidDimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid parameter: {name}")]
    InvalidParameter { name: &'static str },
    #[error(
        "Constraints {first} and {second} in the same partition share particle {particle}"
    )]
    InvalidPartition {
        first: usize,
        second: usize,
        particle: usize,
    },
}
