use serde::{Deserialize, Serialize};

use crate::Vec3;

/// Constraint formulation selected for a whole solve.
///
/// `Pbd` scales each correction by the constraint stiffness every sweep;
/// `Xpbd` accumulates a Lagrange multiplier against the compliance, which
/// makes the effective stiffness independent of the iteration count.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    Pbd,
    Xpbd,
}

/// Denominators smaller than this are treated as a vanished gradient and
/// the projection is skipped.
const GRADIENT_EPSILON: f64 = 1e-12;

#[derive(Clone, Debug)]
enum ConstraintKind {
    /// Keeps two particles at a fixed rest length.
    Distance {
        particles: [usize; 2],
        rest_length: f64,
    },
    /// Keeps the signed volume of a tetrahedral element at its rest value.
    Volume {
        particles: [usize; 4],
        rest_volume: f64,
    },
}

/// A position-based constraint over particles of a single body.
///
/// Stores particle indices into the shared position/inverse-mass buffers,
/// never references: index disjointness is what makes partitioned
/// projection checkable.
#[derive(Clone, Debug)]
pub struct PbdConstraint {
    kind: ConstraintKind,
    stiffness: f64,
    compliance: f64,
    lambda: f64,
}

impl PbdConstraint {
    /// Distance constraint with the rest length measured from the given
    /// initial positions.
    pub fn distance(
        positions: &[Vec3],
        i0: usize,
        i1: usize,
        stiffness: f64,
        compliance: f64,
    ) -> Self {
        let rest_length = (positions[i0] - positions[i1]).norm();
        PbdConstraint {
            kind: ConstraintKind::Distance {
                particles: [i0, i1],
                rest_length,
            },
            stiffness,
            compliance,
            lambda: 0.0,
        }
    }

    /// Tetrahedral volume constraint with the rest volume measured from
    /// the given initial positions.
    pub fn volume(
        positions: &[Vec3],
        particles: [usize; 4],
        stiffness: f64,
        compliance: f64,
    ) -> Self {
        let [i0, i1, i2, i3] = particles;
        let rest_volume = (positions[i1] - positions[i0])
            .cross(&(positions[i2] - positions[i0]))
            .dot(&(positions[i3] - positions[i0]))
            / 6.0;
        PbdConstraint {
            kind: ConstraintKind::Volume {
                particles,
                rest_volume,
            },
            stiffness,
            compliance,
            lambda: 0.0,
        }
    }

    pub fn particles(&self) -> &[usize] {
        match &self.kind {
            ConstraintKind::Distance { particles, .. } => particles,
            ConstraintKind::Volume { particles, .. } => particles,
        }
    }

    /// Accumulated Lagrange multiplier of the current solve.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn zero_out_lambda(&mut self) {
        self.lambda = 0.0;
    }

    /// Magnitude of the constraint force implied by the accumulated
    /// multiplier over a timestep.
    pub fn force(&self, dt: f64) -> f64 {
        self.lambda / (dt * dt)
    }

    /// Constraint value and per-particle gradients at the current
    /// positions. Returns `None` for degenerate geometry (coincident
    /// distance endpoints).
    fn evaluate(&self, positions: &[Vec3]) -> Option<(f64, [Vec3; 4], usize)> {
        match &self.kind {
            ConstraintKind::Distance {
                particles: [i0, i1],
                rest_length,
            } => {
                let diff = positions[*i0] - positions[*i1];
                let length = diff.norm();
                if length <= GRADIENT_EPSILON {
                    return None;
                }
                let n = diff / length;
                let c = length - rest_length;
                Some((c, [n, -n, Vec3::zeros(), Vec3::zeros()], 2))
            }
            ConstraintKind::Volume {
                particles: [i0, i1, i2, i3],
                rest_volume,
            } => {
                let p0 = positions[*i0];
                let p1 = positions[*i1];
                let p2 = positions[*i2];
                let p3 = positions[*i3];
                let volume = (p1 - p0).cross(&(p2 - p0)).dot(&(p3 - p0)) / 6.0;
                let c = volume - rest_volume;
                let g0 = (p3 - p1).cross(&(p2 - p1)) / 6.0;
                let g1 = (p2 - p0).cross(&(p3 - p0)) / 6.0;
                let g2 = (p3 - p0).cross(&(p1 - p0)) / 6.0;
                let g3 = (p1 - p0).cross(&(p2 - p0)) / 6.0;
                Some((c, [g0, g1, g2, g3], 4))
            }
        }
    }

    /// Projects the constraint onto the shared position buffer.
    ///
    /// Computes the scalar correction from the current violation and
    /// writes position updates scaled by each particle's inverse mass;
    /// pinned particles (zero inverse mass) never move.
    pub fn project(
        &mut self,
        positions: &mut [Vec3],
        inv_masses: &[f64],
        dt: f64,
        solver: SolverKind,
    ) {
        let Some((c, gradients, count)) = self.evaluate(positions) else {
            return;
        };
        let mut ids = [0usize; 4];
        ids[..count].copy_from_slice(&self.particles()[..count]);

        let mut weighted_sum = 0.0;
        for k in 0..count {
            weighted_sum += inv_masses[ids[k]] * gradients[k].norm_squared();
        }

        let delta_lambda = match solver {
            SolverKind::Xpbd => {
                let alpha = if dt > 0.0 {
                    self.compliance / (dt * dt)
                } else {
                    0.0
                };
                if weighted_sum + alpha < GRADIENT_EPSILON {
                    return;
                }
                let delta = -(c + alpha * self.lambda) / (weighted_sum + alpha);
                self.lambda += delta;
                delta
            }
            SolverKind::Pbd => {
                if weighted_sum < GRADIENT_EPSILON {
                    return;
                }
                -c * self.stiffness / weighted_sum
            }
        };

        for k in 0..count {
            let w = inv_masses[ids[k]];
            if w > 0.0 {
                positions[ids[k]] += gradients[k] * (w * delta_lambda);
            }
        }
    }
}

#[derive(Clone, Debug)]
enum CollisionKind {
    /// Pushes a penetrating point of body B out of a triangle of body A.
    PointTriangle {
        triangle: [usize; 3],
        point: usize,
    },
    /// Glues a weighted combination of body-A particles to a weighted
    /// combination of body-B particles.
    BaryPointToPoint {
        particles_a: [usize; 4],
        weights_a: [f64; 4],
        count_a: usize,
        particles_b: [usize; 4],
        weights_b: [f64; 4],
        count_b: usize,
    },
}

/// A constraint between two bodies with independent buffers.
///
/// Generated fresh every frame by the collision pipeline, so it carries
/// no accumulated multiplier; corrections are plain PBD scaled by the
/// per-side stiffness.
#[derive(Clone, Debug)]
pub struct PbdCollisionConstraint {
    kind: CollisionKind,
    stiffness_a: f64,
    stiffness_b: f64,
}

impl PbdCollisionConstraint {
    pub fn point_triangle(
        triangle: [usize; 3],
        point: usize,
        stiffness_a: f64,
        stiffness_b: f64,
    ) -> Self {
        PbdCollisionConstraint {
            kind: CollisionKind::PointTriangle { triangle, point },
            stiffness_a,
            stiffness_b,
        }
    }

    /// Builds a bary-point attachment; unused slots of the fixed-size id
    /// arrays are ignored past the respective counts.
    pub fn bary_point_to_point(
        particles_a: &[usize],
        weights_a: &[f64],
        particles_b: &[usize],
        weights_b: &[f64],
        stiffness_a: f64,
        stiffness_b: f64,
    ) -> Self {
        assert!(particles_a.len() == weights_a.len() && particles_a.len() <= 4);
        assert!(particles_b.len() == weights_b.len() && particles_b.len() <= 4);
        let mut pa = [0usize; 4];
        let mut wa = [0.0; 4];
        let mut pb = [0usize; 4];
        let mut wb = [0.0; 4];
        pa[..particles_a.len()].copy_from_slice(particles_a);
        wa[..weights_a.len()].copy_from_slice(weights_a);
        pb[..particles_b.len()].copy_from_slice(particles_b);
        wb[..weights_b.len()].copy_from_slice(weights_b);
        PbdCollisionConstraint {
            kind: CollisionKind::BaryPointToPoint {
                particles_a: pa,
                weights_a: wa,
                count_a: particles_a.len(),
                particles_b: pb,
                weights_b: wb,
                count_b: particles_b.len(),
            },
            stiffness_a,
            stiffness_b,
        }
    }

    /// Projects the constraint against its pair of position buffers.
    pub fn project(
        &self,
        positions_a: &mut [Vec3],
        inv_masses_a: &[f64],
        positions_b: &mut [Vec3],
        inv_masses_b: &[f64],
    ) {
        match &self.kind {
            CollisionKind::PointTriangle {
                triangle: [i0, i1, i2],
                point,
            } => {
                let x0 = positions_a[*i0];
                let x1 = positions_a[*i1];
                let x2 = positions_a[*i2];
                let p = positions_b[*point];

                let normal = (x1 - x0).cross(&(x2 - x0));
                let area2 = normal.norm();
                if area2 <= GRADIENT_EPSILON {
                    return;
                }
                let n = normal / area2;

                // Signed height of the point over the triangle plane; a
                // non-negative value means no penetration.
                let c = n.dot(&(p - x0));
                if c >= 0.0 {
                    return;
                }

                // Barycentric weights of the point's in-plane projection
                // distribute the triangle-side correction.
                let projected = p - n * c;
                let bary = barycentric_in_plane(&projected, &x0, &x1, &x2);

                let tri_ids = [*i0, *i1, *i2];
                let grads_a = [-bary[0], -bary[1], -bary[2]];
                let mut weighted_sum = inv_masses_b[*point];
                for k in 0..3 {
                    weighted_sum += inv_masses_a[tri_ids[k]] * grads_a[k] * grads_a[k];
                }
                if weighted_sum <= GRADIENT_EPSILON {
                    return;
                }
                let delta = -c / weighted_sum;

                for (k, &i) in tri_ids.iter().enumerate() {
                    let w = inv_masses_a[i];
                    if w > 0.0 {
                        positions_a[i] += n * (w * grads_a[k] * delta * self.stiffness_a);
                    }
                }
                let w = inv_masses_b[*point];
                if w > 0.0 {
                    positions_b[*point] += n * (w * delta * self.stiffness_b);
                }
            }
            CollisionKind::BaryPointToPoint {
                particles_a,
                weights_a,
                count_a,
                particles_b,
                weights_b,
                count_b,
            } => {
                let mut pa = Vec3::zeros();
                for k in 0..*count_a {
                    pa += positions_a[particles_a[k]] * weights_a[k];
                }
                let mut pb = Vec3::zeros();
                for k in 0..*count_b {
                    pb += positions_b[particles_b[k]] * weights_b[k];
                }

                let diff = pb - pa;
                let c = diff.norm();
                if c <= GRADIENT_EPSILON {
                    return;
                }
                let n = diff / c;

                let mut weighted_sum = 0.0;
                for k in 0..*count_a {
                    weighted_sum += inv_masses_a[particles_a[k]] * weights_a[k] * weights_a[k];
                }
                for k in 0..*count_b {
                    weighted_sum += inv_masses_b[particles_b[k]] * weights_b[k] * weights_b[k];
                }
                if weighted_sum <= GRADIENT_EPSILON {
                    return;
                }
                let delta = c / weighted_sum;

                for k in 0..*count_a {
                    let i = particles_a[k];
                    let w = inv_masses_a[i];
                    if w > 0.0 {
                        positions_a[i] += n * (w * weights_a[k] * delta * self.stiffness_a);
                    }
                }
                for k in 0..*count_b {
                    let i = particles_b[k];
                    let w = inv_masses_b[i];
                    if w > 0.0 {
                        positions_b[i] -= n * (w * weights_b[k] * delta * self.stiffness_b);
                    }
                }
            }
        }
    }
}

/// Barycentric coordinates of a point already lying in the triangle
/// plane.
fn barycentric_in_plane(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> [f64; 3] {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= GRADIENT_EPSILON {
        return [1.0, 0.0, 0.0];
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [1.0 - v - w, v, w]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_projection_moves_free_endpoints_together() {
        let mut positions = vec![Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0)];
        let inv_masses = vec![1.0, 1.0];
        // Rest length 1, currently stretched to 2.
        let mut constraint = {
            let rest_positions = vec![Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)];
            PbdConstraint::distance(&rest_positions, 0, 1, 1.0, 0.0)
        };

        constraint.project(&mut positions, &inv_masses, 0.01, SolverKind::Xpbd);
        let length = (positions[0] - positions[1]).norm();
        assert!((length - 1.0).abs() < 1e-10);
        // Equal masses split the correction symmetrically.
        assert!((positions[0].x - 0.5).abs() < 1e-10);
        assert!((positions[1].x - 1.5).abs() < 1e-10);
    }

    #[test]
    fn pinned_particle_never_moves() {
        let mut positions = vec![Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0)];
        let inv_masses = vec![0.0, 1.0];
        let mut constraint = {
            let rest_positions = vec![Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)];
            PbdConstraint::distance(&rest_positions, 0, 1, 1.0, 0.0)
        };
        constraint.project(&mut positions, &inv_masses, 0.01, SolverKind::Xpbd);
        assert_eq!(positions[0], Vec3::zeros());
        assert!((positions[1].x - 1.0).abs() < 1e-10);
    }

    #[test]
    fn lambda_accumulates_and_resets() {
        let mut positions = vec![Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0)];
        let inv_masses = vec![1.0, 1.0];
        let mut constraint = {
            let rest_positions = vec![Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)];
            PbdConstraint::distance(&rest_positions, 0, 1, 1.0, 1e-6)
        };
        constraint.project(&mut positions, &inv_masses, 0.01, SolverKind::Xpbd);
        assert!(constraint.lambda() != 0.0);
        assert!(constraint.force(0.01) != 0.0);
        constraint.zero_out_lambda();
        assert_eq!(constraint.lambda(), 0.0);
    }

    #[test]
    fn volume_projection_restores_rest_volume() {
        let rest = vec![
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let mut constraint = PbdConstraint::volume(&rest, [0, 1, 2, 3], 1.0, 0.0);

        // Squash the tet along z.
        let mut positions = rest.clone();
        positions[3].z = 0.5;
        let inv_masses = vec![1.0; 4];
        for _ in 0..50 {
            constraint.project(&mut positions, &inv_masses, 0.01, SolverKind::Xpbd);
        }
        let volume = (positions[1] - positions[0])
            .cross(&(positions[2] - positions[0]))
            .dot(&(positions[3] - positions[0]))
            / 6.0;
        assert!((volume - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn point_triangle_pushes_point_out() {
        let mut positions_a = vec![
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let inv_masses_a = vec![0.0; 3];
        let mut positions_b = vec![Vec3::new(0.25, 0.25, -0.1)];
        let inv_masses_b = vec![1.0];

        let constraint = PbdCollisionConstraint::point_triangle([0, 1, 2], 0, 1.0, 1.0);
        for _ in 0..10 {
            constraint.project(
                &mut positions_a,
                &inv_masses_a,
                &mut positions_b,
                &inv_masses_b,
            );
        }
        // The point ends up on (or above) the triangle plane.
        assert!(positions_b[0].z >= -1e-10);
        // The fixed triangle stays put.
        assert_eq!(positions_a[1], Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn bary_attachment_pulls_point_to_target() {
        let mut positions_a = vec![
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let inv_masses_a = vec![0.0; 4];
        let mut positions_b = vec![Vec3::new(1.0, 1.0, 1.0)];
        let inv_masses_b = vec![1.0];

        let constraint = PbdCollisionConstraint::bary_point_to_point(
            &[0, 1, 2, 3],
            &[0.25, 0.25, 0.25, 0.25],
            &[0],
            &[1.0],
            1.0,
            1.0,
        );
        for _ in 0..50 {
            constraint.project(
                &mut positions_a,
                &inv_masses_a,
                &mut positions_b,
                &inv_masses_b,
            );
        }
        let target = Vec3::new(0.25, 0.25, 0.25);
        assert!((positions_b[0] - target).norm() < 1e-8);
    }
}
