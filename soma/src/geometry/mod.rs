//! Mesh queries and spatial search feeding constraint generation.

pub mod neighbor_search;
pub mod queries;
pub mod tetmesh;

pub use neighbor_search::GridBasedNeighborSearch;
pub use queries::{closest_point_on_triangle, TriangleRegion};
pub use tetmesh::{SurfaceExtraction, SurfaceMesh, TetrahedralMesh};
