use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::constraint::{PbdCollisionConstraint, PbdConstraint, SolverKind};
use super::partition::ConstraintPartition;
use crate::{Error, Vec3};

/// Raw view of the shared position buffer handed to a partition's
/// parallel projection pass.
///
/// Materializing a mutable slice per rayon task aliases the buffer, but
/// every write lands in a distinct slot: partition construction rejects
/// any two constraints sharing a particle, so the tasks' write sets are
/// disjoint by the checked invariant.
#[derive(Copy, Clone)]
struct SharedPositions {
    ptr: *mut Vec3,
    len: usize,
}

unsafe impl Send for SharedPositions {}
unsafe impl Sync for SharedPositions {}

impl SharedPositions {
    /// Safety: callers must not write the same slot from two tasks.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice(&self) -> &mut [Vec3] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

/// Projects position-based constraints onto a shared particle buffer.
///
/// Runs a fixed number of Gauss-Seidel-style sweeps: within a sweep the
/// un-partitioned constraints are projected sequentially (later
/// constraints see earlier corrections), then each partition is projected
/// in parallel while partitions stay sequential relative to each other.
/// There is no convergence check; a fixed per-frame budget beats exact
/// convergence for realtime stepping.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct PbdSolver {
    pub iterations: u32,
    pub dt: f64,
    pub solver_kind: SolverKind,
}

impl Default for PbdSolver {
    fn default() -> Self {
        PbdSolver {
            iterations: 10,
            dt: 0.01,
            solver_kind: SolverKind::Xpbd,
        }
    }
}

impl PbdSolver {
    pub fn new(iterations: u32, dt: f64, solver_kind: SolverKind) -> Self {
        PbdSolver {
            iterations,
            dt,
            solver_kind,
        }
    }

    /// Runs the configured number of sweeps, mutating `positions` in
    /// place. Buffers are borrowed only for this call.
    pub fn solve(
        &self,
        positions: &mut [Vec3],
        inv_masses: &[f64],
        constraints: &mut [PbdConstraint],
        partitions: &mut [ConstraintPartition],
    ) -> Result<(), Error> {
        if positions.len() != inv_masses.len() {
            return Err(Error::InvalidDimension {
                what: "inverse mass buffer",
                expected: positions.len(),
                actual: inv_masses.len(),
            });
        }

        // Start every solve from a clean multiplier state.
        for constraint in constraints.iter_mut() {
            constraint.zero_out_lambda();
        }
        partitions.par_iter_mut().for_each(|partition| {
            for constraint in partition.constraints_mut() {
                constraint.zero_out_lambda();
            }
        });

        let dt = self.dt;
        let solver_kind = self.solver_kind;
        for _ in 0..self.iterations {
            for constraint in constraints.iter_mut() {
                constraint.project(positions, inv_masses, dt, solver_kind);
            }

            for partition in partitions.iter_mut() {
                let shared = SharedPositions {
                    ptr: positions.as_mut_ptr(),
                    len: positions.len(),
                };
                partition
                    .constraints_mut()
                    .par_iter_mut()
                    .for_each(|constraint| {
                        let positions = unsafe { shared.slice() };
                        constraint.project(positions, inv_masses, dt, solver_kind);
                    });
            }
        }
        Ok(())
    }
}

struct CollisionPair<'a> {
    constraints: &'a mut [PbdCollisionConstraint],
    positions_a: &'a mut [Vec3],
    inv_masses_a: &'a [f64],
    positions_b: &'a mut [Vec3],
    inv_masses_b: &'a [f64],
}

/// Solves collision constraints between pairs of bodies.
///
/// Collision constraints are regenerated every frame between arbitrary
/// body pairs and are not known to be partition-safe, so every sweep is
/// fully sequential. Registered pair lists are cleared by the solve; a
/// stale contact can never leak into the next frame.
pub struct PbdCollisionSolver<'a> {
    collision_iterations: u32,
    pairs: Vec<CollisionPair<'a>>,
}

impl<'a> Default for PbdCollisionSolver<'a> {
    fn default() -> Self {
        PbdCollisionSolver::new(5)
    }
}

impl<'a> PbdCollisionSolver<'a> {
    pub fn new(collision_iterations: u32) -> Self {
        PbdCollisionSolver {
            collision_iterations,
            pairs: Vec::new(),
        }
    }

    pub fn set_collision_iterations(&mut self, collision_iterations: u32) {
        self.collision_iterations = collision_iterations;
    }

    /// Registers the collision constraints of one interacting pair
    /// together with the two bodies' buffers.
    pub fn add_collision_constraints(
        &mut self,
        constraints: &'a mut [PbdCollisionConstraint],
        positions_a: &'a mut [Vec3],
        inv_masses_a: &'a [f64],
        positions_b: &'a mut [Vec3],
        inv_masses_b: &'a [f64],
    ) {
        self.pairs.push(CollisionPair {
            constraints,
            positions_a,
            inv_masses_a,
            positions_b,
            inv_masses_b,
        });
    }

    /// Sweeps every registered pair list, then clears the registrations.
    pub fn solve(&mut self) {
        if self.pairs.is_empty() {
            return;
        }
        for _ in 0..self.collision_iterations {
            for pair in self.pairs.iter_mut() {
                for constraint in pair.constraints.iter() {
                    constraint.project(
                        pair.positions_a,
                        pair.inv_masses_a,
                        pair.positions_b,
                        pair.inv_masses_b,
                    );
                }
            }
        }
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_converges_monotonically_to_rest_length() {
        let rest = vec![Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)];
        let mut positions = vec![Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0)];
        let inv_masses = vec![1.0, 1.0];
        let mut constraints =
            vec![PbdConstraint::distance(&rest, 0, 1, 1.0, 1e-4)];

        let solver = PbdSolver::new(1, 0.01, SolverKind::Xpbd);
        let mut previous_violation = (positions[0] - positions[1]).norm() - 1.0;
        for _ in 0..40 {
            solver
                .solve(&mut positions, &inv_masses, &mut constraints, &mut [])
                .unwrap();
            let violation = (positions[0] - positions[1]).norm() - 1.0;
            assert!(violation >= -1e-12, "no overshoot past the rest length");
            assert!(violation <= previous_violation + 1e-12);
            previous_violation = violation;
        }
        assert!(previous_violation.abs() < 1e-3);
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        let mut positions = vec![Vec3::zeros()];
        let inv_masses = vec![1.0, 1.0];
        let solver = PbdSolver::default();
        let err = solver
            .solve(&mut positions, &inv_masses, &mut [], &mut [])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { .. }));
    }

    #[test]
    fn collision_solver_clears_registrations() {
        let mut constraints = vec![PbdCollisionConstraint::point_triangle([0, 1, 2], 0, 1.0, 1.0)];
        let mut positions_a = vec![
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let inv_masses_a = vec![0.0; 3];
        let mut positions_b = vec![Vec3::new(0.25, 0.25, -0.2)];
        let inv_masses_b = vec![1.0];

        let mut solver = PbdCollisionSolver::default();
        solver.add_collision_constraints(
            &mut constraints,
            &mut positions_a,
            &inv_masses_a,
            &mut positions_b,
            &inv_masses_b,
        );
        solver.solve();
        assert!(solver.pairs.is_empty());
        assert!(positions_b[0].z >= -1e-10);
    }
}
