use ahash::{AHashMap, AHashSet};

use crate::{Error, Vec3};

/// Local vertex triples forming the four faces of a tetrahedron; face `t`
/// leaves local vertex `3 - t` behind.
const FACE_PATTERN: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];

/// A triangle surface mesh, typically the boundary of a tetrahedral mesh.
#[derive(Clone, Debug)]
pub struct SurfaceMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[usize; 3]>,
}

impl SurfaceMesh {
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }
}

/// Boundary surface of a tetrahedral mesh plus the bookkeeping linking it
/// back to the volume.
#[derive(Clone, Debug)]
pub struct SurfaceExtraction {
    pub mesh: SurfaceMesh,
    /// Parent tetrahedron of each surface triangle.
    pub parent_tets: Vec<usize>,
    /// Original mesh vertex behind each surface vertex.
    pub vertex_map: Vec<usize>,
}

/// A tetrahedral mesh as a plain value: vertex positions plus vertex
/// id quadruples, one per tetrahedron.
#[derive(Clone, Debug)]
pub struct TetrahedralMesh {
    vertices: Vec<Vec3>,
    tets: Vec<[usize; 4]>,
}

impl TetrahedralMesh {
    pub fn new(vertices: Vec<Vec3>, tets: Vec<[usize; 4]>) -> Result<Self, Error> {
        let n = vertices.len();
        if tets.iter().flatten().any(|&v| v >= n) {
            return Err(Error::InvalidParameter {
                name: "tetrahedron vertex id",
            });
        }
        Ok(TetrahedralMesh { vertices, tets })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn vertices_mut(&mut self) -> &mut [Vec3] {
        &mut self.vertices
    }

    pub fn tets(&self) -> &[[usize; 4]] {
        &self.tets
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_tets(&self) -> usize {
        self.tets.len()
    }

    /// Total volume of the mesh.
    ///
    /// An inverted tetrahedron is reported as a warning and contributes
    /// the absolute value of its signed volume.
    pub fn volume(&self) -> f64 {
        let mut volume = 0.0;
        for (tet_id, tet) in self.tets.iter().enumerate() {
            let det = self.tet_determinant(tet);
            if det < 0.0 {
                log::warn!("tetrahedron {} is inverted, has negative volume", tet_id);
            }
            volume += det.abs() / 6.0;
        }
        volume
    }

    /// Barycentric weights of `p` with respect to tetrahedron `tet_id`.
    ///
    /// Computed from determinant ratios; a degenerate (zero-volume)
    /// tetrahedron yields non-finite weights.
    pub fn barycentric_weights(&self, tet_id: usize, p: &Vec3) -> [f64; 4] {
        let tet = &self.tets[tet_id];
        let det = self.tet_determinant(tet);
        let mut weights = [0.0; 4];
        for (i, w) in weights.iter_mut().enumerate() {
            let mut m = self.tet_matrix(tet);
            m[(i, 0)] = p.x;
            m[(i, 1)] = p.y;
            m[(i, 2)] = p.z;
            *w = m.determinant() / det;
        }
        weights
    }

    /// Axis-aligned bounding box of one tetrahedron.
    pub fn tet_bounding_box(&self, tet_id: usize) -> (Vec3, Vec3) {
        let tet = &self.tets[tet_id];
        let mut min = self.vertices[tet[0]];
        let mut max = min;
        for &v in &tet[1..] {
            let p = self.vertices[v];
            min = min.inf(&p);
            max = max.sup(&p);
        }
        (min, max)
    }

    /// Unique edges of the mesh, each as an ascending vertex id pair,
    /// sorted for deterministic output.
    pub fn edges(&self) -> Vec<[usize; 2]> {
        let mut edges: AHashSet<[usize; 2]> = AHashSet::new();
        for tet in &self.tets {
            for i in 0..4 {
                for j in (i + 1)..4 {
                    let (a, b) = (tet[i].min(tet[j]), tet[i].max(tet[j]));
                    edges.insert([a, b]);
                }
            }
        }
        let mut edges: Vec<_> = edges.into_iter().collect();
        edges.sort_unstable();
        edges
    }

    /// Extracts the boundary surface.
    ///
    /// Faces shared by two tetrahedra cancel; each surviving face is
    /// wound so its normal points away from the opposite vertex of its
    /// parent tetrahedron, and surface vertices are renumbered
    /// contiguously from 0 in ascending original-id order.
    pub fn extract_surface(&self) -> SurfaceExtraction {
        struct Face {
            triangle: [usize; 3],
            tet_id: usize,
            opposite: usize,
        }

        // Cancellation keyed on the sorted vertex triple; slots keep the
        // first-seen order so the output is deterministic.
        let mut slot_of: AHashMap<[usize; 3], usize> = AHashMap::new();
        let mut faces: Vec<Option<Face>> = Vec::new();
        for (tet_id, tet) in self.tets.iter().enumerate() {
            for (t, pattern) in FACE_PATTERN.iter().enumerate() {
                let triangle = [tet[pattern[0]], tet[pattern[1]], tet[pattern[2]]];
                let mut key = triangle;
                key.sort_unstable();
                match slot_of.remove(&key) {
                    Some(slot) => faces[slot] = None,
                    None => {
                        slot_of.insert(key, faces.len());
                        faces.push(Some(Face {
                            triangle,
                            tet_id,
                            opposite: tet[3 - t],
                        }));
                    }
                }
            }
        }

        let mut triangles = Vec::new();
        let mut parent_tets = Vec::new();
        for face in faces.into_iter().flatten() {
            let Face {
                mut triangle,
                tet_id,
                opposite,
            } = face;
            let v0 = self.vertices[triangle[0]];
            let v1 = self.vertices[triangle[1]];
            let v2 = self.vertices[triangle[2]];
            let centroid = (v0 + v1 + v2) / 3.0;
            let normal = (v1 - v0).cross(&(v2 - v0));
            if normal.dot(&(centroid - self.vertices[opposite])) < 0.0 {
                triangle.swap(1, 2);
            }
            triangles.push(triangle);
            parent_tets.push(tet_id);
        }

        // Renumber surface vertices contiguously from 0.
        let mut vertex_map: Vec<usize> = triangles.iter().flatten().copied().collect();
        vertex_map.sort_unstable();
        vertex_map.dedup();
        let new_id: AHashMap<usize, usize> = vertex_map
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect();
        for triangle in triangles.iter_mut() {
            for v in triangle.iter_mut() {
                *v = new_id[v];
            }
        }
        let vertices = vertex_map.iter().map(|&old| self.vertices[old]).collect();

        SurfaceExtraction {
            mesh: SurfaceMesh {
                vertices,
                triangles,
            },
            parent_tets,
            vertex_map,
        }
    }

    fn tet_matrix(&self, tet: &[usize; 4]) -> na::Matrix4<f64> {
        let v: Vec<Vec3> = tet.iter().map(|&i| self.vertices[i]).collect();
        na::Matrix4::new(
            v[0].x, v[0].y, v[0].z, 1.0, //
            v[1].x, v[1].y, v[1].z, 1.0, //
            v[2].x, v[2].y, v[2].z, 1.0, //
            v[3].x, v[3].y, v[3].z, 1.0,
        )
    }

    fn tet_determinant(&self, tet: &[usize; 4]) -> f64 {
        self.tet_matrix(tet).determinant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn two_tets() -> TetrahedralMesh {
        // Two tetrahedra sharing the face (1, 2, 3).
        TetrahedralMesh::new(
            vec![
                Vec3::zeros(),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
            ],
            vec![[0, 1, 2, 3], [4, 1, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn out_of_range_vertex_id_is_rejected() {
        let err = TetrahedralMesh::new(vec![Vec3::zeros()], vec![[0, 0, 0, 1]]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn single_tet_surface_has_four_outward_triangles() {
        let mesh = unit_tet();
        let surface = mesh.extract_surface();
        assert_eq!(surface.mesh.num_triangles(), 4);
        assert_eq!(surface.mesh.num_vertices(), 4);
        assert_eq!(surface.vertex_map, vec![0, 1, 2, 3]);
        assert_eq!(surface.parent_tets, vec![0; 4]);

        // Every triangle's normal points away from the centroid of the
        // tetrahedron.
        let tet_centroid =
            mesh.vertices().iter().fold(Vec3::zeros(), |acc, v| acc + v) / 4.0;
        for triangle in surface.mesh.triangles() {
            let v0 = surface.mesh.vertices()[triangle[0]];
            let v1 = surface.mesh.vertices()[triangle[1]];
            let v2 = surface.mesh.vertices()[triangle[2]];
            let centroid = (v0 + v1 + v2) / 3.0;
            let normal = (v1 - v0).cross(&(v2 - v0));
            assert!(normal.dot(&(centroid - tet_centroid)) > 0.0);
        }
    }

    #[test]
    fn shared_face_cancels() {
        let mesh = two_tets();
        let surface = mesh.extract_surface();
        assert_eq!(surface.mesh.num_triangles(), 6);
        assert_eq!(surface.mesh.num_vertices(), 5);
        // Ids are renumbered contiguously from 0.
        let max_id = surface
            .mesh
            .triangles()
            .iter()
            .flatten()
            .copied()
            .max()
            .unwrap();
        assert_eq!(max_id, 4);
    }

    #[test]
    fn barycentric_weights_interpolate() {
        let mesh = unit_tet();
        // A vertex has weight one on itself.
        let w = mesh.barycentric_weights(0, &Vec3::new(1.0, 0.0, 0.0));
        assert!((w[1] - 1.0).abs() < 1e-12);
        assert!(w[0].abs() < 1e-12 && w[2].abs() < 1e-12 && w[3].abs() < 1e-12);

        // An interior point reproduces itself through the weights.
        let p = Vec3::new(0.2, 0.3, 0.1);
        let w = mesh.barycentric_weights(0, &p);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let mut recovered = Vec3::zeros();
        for (i, &v) in mesh.tets()[0].iter().enumerate() {
            recovered += mesh.vertices()[v] * w[i];
        }
        assert!((recovered - p).norm() < 1e-12);
    }

    #[test]
    fn mesh_volume_ignores_inversion_sign() {
        let mesh = unit_tet();
        assert!((mesh.volume() - 1.0 / 6.0).abs() < 1e-12);

        // Swapping two vertices inverts the tet; the volume magnitude is
        // unchanged.
        let inverted = TetrahedralMesh::new(
            mesh.vertices().to_vec(),
            vec![[1, 0, 2, 3]],
        )
        .unwrap();
        assert!((inverted.volume() - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn tet_bounding_box_covers_vertices() {
        let mesh = two_tets();
        let (min, max) = mesh.tet_bounding_box(1);
        assert_eq!(min, Vec3::zeros());
        assert_eq!(max, Vec3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn edges_are_unique_and_sorted() {
        let mesh = unit_tet();
        let edges = mesh.edges();
        assert_eq!(edges.len(), 6);
        assert_eq!(edges[0], [0, 1]);
        assert_eq!(edges[5], [2, 3]);

        // The shared face contributes its edges once.
        assert_eq!(two_tets().edges().len(), 6 + 6 - 3);
    }
}
