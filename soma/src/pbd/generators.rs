//! Procedural constraint production from geometry.
//!
//! These helpers turn meshes and point sets into the constraint lists the
//! solvers consume; the solvers themselves never look at geometry.

use crate::geometry::{closest_point_on_triangle, GridBasedNeighborSearch, TetrahedralMesh};
use crate::{Error, Vec3};

use super::constraint::{PbdCollisionConstraint, PbdConstraint};

/// One distance constraint per unique edge, with rest lengths measured
/// from the given positions.
pub fn distance_constraints_from_edges(
    positions: &[Vec3],
    edges: &[[usize; 2]],
    stiffness: f64,
    compliance: f64,
) -> Vec<PbdConstraint> {
    edges
        .iter()
        .map(|&[a, b]| PbdConstraint::distance(positions, a, b, stiffness, compliance))
        .collect()
}

/// One volume constraint per tetrahedron of the mesh.
pub fn volume_constraints(
    mesh: &TetrahedralMesh,
    stiffness: f64,
    compliance: f64,
) -> Vec<PbdConstraint> {
    mesh.tets()
        .iter()
        .map(|&tet| PbdConstraint::volume(mesh.vertices(), tet, stiffness, compliance))
        .collect()
}

/// Distance constraints between nearby particles of two index sets
/// sharing one position arena.
///
/// Every `set_a` particle is tied to each `set_b` particle strictly
/// within `radius`; duplicate pairs (including a particle listed in both
/// sets) are emitted once.
pub fn proximity_distance_constraints(
    positions: &[Vec3],
    set_a: &[usize],
    set_b: &[usize],
    radius: f64,
    stiffness: f64,
    compliance: f64,
) -> Result<Vec<PbdConstraint>, Error> {
    let points_a: Vec<Vec3> = set_a.iter().map(|&i| positions[i]).collect();
    let points_b: Vec<Vec3> = set_b.iter().map(|&i| positions[i]).collect();

    let search = GridBasedNeighborSearch::new(radius);
    let neighbors = search.get_neighbors_pair(&points_a, &points_b)?;

    let mut seen = ahash::AHashSet::new();
    let mut constraints = Vec::new();
    for (a_local, b_locals) in neighbors.iter().enumerate() {
        let a = set_a[a_local];
        for &b_local in b_locals {
            let b = set_b[b_local];
            if a == b {
                continue;
            }
            let key = [a.min(b), a.max(b)];
            if seen.insert(key) {
                constraints.push(PbdConstraint::distance(
                    positions, key[0], key[1], stiffness, compliance,
                ));
            }
        }
    }
    Ok(constraints)
}

/// Attaches free points to the surface of a tetrahedral mesh.
///
/// For each point whose squared distance to the extracted surface is
/// within `tolerance`, emits a bary-point attachment binding the point
/// (body B) to its nearest triangle's parent tetrahedron (body A) through
/// barycentric weights. Points away from the surface are skipped.
pub fn attachment_constraints(
    mesh: &TetrahedralMesh,
    points: &[Vec3],
    tolerance: f64,
    stiffness_a: f64,
    stiffness_b: f64,
) -> Vec<PbdCollisionConstraint> {
    let surface = mesh.extract_surface();
    let mut constraints = Vec::new();

    for (point_id, p) in points.iter().enumerate() {
        let mut min_dist_sqr = f64::MAX;
        let mut nearest_triangle = None;
        for (tri_id, tri) in surface.mesh.triangles().iter().enumerate() {
            let x0 = surface.mesh.vertices()[tri[0]];
            let x1 = surface.mesh.vertices()[tri[1]];
            let x2 = surface.mesh.vertices()[tri[2]];
            let (closest, _) = closest_point_on_triangle(p, &x0, &x1, &x2);
            let dist_sqr = (closest - p).norm_squared();
            if dist_sqr < min_dist_sqr {
                min_dist_sqr = dist_sqr;
                nearest_triangle = Some(tri_id);
            }
        }

        let Some(tri_id) = nearest_triangle else {
            continue;
        };
        if min_dist_sqr > tolerance {
            continue;
        }

        let tet_id = surface.parent_tets[tri_id];
        let weights = mesh.barycentric_weights(tet_id, p);
        constraints.push(PbdCollisionConstraint::bary_point_to_point(
            &mesh.tets()[tet_id],
            &weights,
            &[point_id],
            &[1.0],
            stiffness_a,
            stiffness_b,
        ));
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pbd::{PbdSolver, SolverKind};

    fn unit_tet() -> TetrahedralMesh {
        TetrahedralMesh::new(
            vec![
                Vec3::zeros(),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 1, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn one_constraint_per_edge_and_tet() {
        let mesh = unit_tet();
        let edges = mesh.edges();
        let distance =
            distance_constraints_from_edges(mesh.vertices(), &edges, 1.0, 0.0);
        assert_eq!(distance.len(), 6);
        assert_eq!(volume_constraints(&mesh, 1.0, 0.0).len(), 1);
    }

    #[test]
    fn proximity_pairs_are_deduplicated() {
        let positions = vec![
            Vec3::zeros(),
            Vec3::new(0.1, 0.0, 0.0),
            Vec3::new(5.0, 0.0, 0.0),
        ];
        // Symmetric sets: each close pair must appear exactly once.
        let constraints = proximity_distance_constraints(
            &positions,
            &[0, 1, 2],
            &[0, 1, 2],
            0.5,
            1.0,
            0.0,
        )
        .unwrap();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].particles(), &[0, 1]);
    }

    #[test]
    fn generated_constraints_hold_a_stretched_tet_together() {
        let mesh = unit_tet();
        let mut positions = mesh.vertices().to_vec();
        positions[3] *= 2.0;
        let inv_masses = vec![0.0, 0.0, 0.0, 1.0];

        let mut constraints = distance_constraints_from_edges(
            mesh.vertices(),
            &mesh.edges(),
            1.0,
            0.0,
        );

        let solver = PbdSolver::new(20, 0.01, SolverKind::Xpbd);
        solver
            .solve(&mut positions, &inv_masses, &mut constraints, &mut [])
            .unwrap();

        // The free vertex is pulled back to its rest distance from the
        // pinned base.
        let d = (positions[3] - positions[0]).norm();
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn attachments_bind_points_near_the_surface() {
        let mesh = unit_tet();
        let points = vec![
            // On the surface (base face).
            Vec3::new(0.25, 0.25, 0.0),
            // Far away.
            Vec3::new(5.0, 5.0, 5.0),
        ];
        let constraints = attachment_constraints(&mesh, &points, 1e-6, 1.0, 1.0);
        assert_eq!(constraints.len(), 1);
    }
}
