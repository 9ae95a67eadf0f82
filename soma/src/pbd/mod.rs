//! Position-based dynamics: constraints, partitions and projection
//! solvers.

mod constraint;
pub mod generators;
mod partition;
mod solver;

pub use constraint::{PbdCollisionConstraint, PbdConstraint, SolverKind};
pub use partition::{partition_constraints, ConstraintPartition};
pub use solver::{PbdCollisionSolver, PbdSolver};
