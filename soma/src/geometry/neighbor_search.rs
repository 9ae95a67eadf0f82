use crate::{Error, Vec3};

/// Radii below this are treated as zero and rejected.
const MIN_RADIUS: f64 = 1e-8;

/// Uniform bucket grid over the candidate set's bounding box.
///
/// Built from scratch for every query; never outlives one call.
struct UniformGrid {
    lower: Vec3,
    cell_size: f64,
    dims: [i64; 3],
    cells: Vec<Vec<usize>>,
}

impl UniformGrid {
    fn new(lower: Vec3, upper: Vec3, cell_size: f64) -> Self {
        let extent = upper - lower;
        let dims = [
            ((extent.x / cell_size).ceil() as i64).max(1),
            ((extent.y / cell_size).ceil() as i64).max(1),
            ((extent.z / cell_size).ceil() as i64).max(1),
        ];
        let num_cells = (dims[0] * dims[1] * dims[2]) as usize;
        UniformGrid {
            lower,
            cell_size,
            dims,
            cells: vec![Vec::new(); num_cells],
        }
    }

    fn cell_coords(&self, p: &Vec3) -> [i64; 3] {
        let rel = (p - self.lower) / self.cell_size;
        [
            rel.x.floor() as i64,
            rel.y.floor() as i64,
            rel.z.floor() as i64,
        ]
    }

    fn is_valid(&self, axis: usize, coord: i64) -> bool {
        coord >= 0 && coord < self.dims[axis]
    }

    fn cell_index(&self, coords: [i64; 3]) -> usize {
        (coords[0] + self.dims[0] * (coords[1] + self.dims[1] * coords[2])) as usize
    }

    fn insert(&mut self, p: &Vec3, index: usize) {
        let coords = self.cell_coords(p);
        debug_assert!((0..3).all(|axis| self.is_valid(axis, coords[axis])));
        let cell = self.cell_index(coords);
        self.cells[cell].push(index);
    }
}

/// Fixed-radius neighbor queries over point sets, backed by a uniform
/// grid with cell edge equal to the search radius.
#[derive(Copy, Clone, Debug)]
pub struct GridBasedNeighborSearch {
    radius: f64,
}

impl GridBasedNeighborSearch {
    pub fn new(radius: f64) -> Self {
        GridBasedNeighborSearch { radius }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.radius = radius;
    }

    /// Neighbors of every point within the same set. A point is its own
    /// neighbor (distance zero).
    pub fn get_neighbors(&self, points: &[Vec3]) -> Result<Vec<Vec<usize>>, Error> {
        self.get_neighbors_pair(points, points)
    }

    /// For each point of `set_a`, the indices of `set_b` points strictly
    /// within the search radius.
    pub fn get_neighbors_pair(
        &self,
        set_a: &[Vec3],
        set_b: &[Vec3],
    ) -> Result<Vec<Vec<usize>>, Error> {
        if self.radius.abs() < MIN_RADIUS {
            return Err(Error::InvalidParameter {
                name: "search radius",
            });
        }
        if set_b.is_empty() {
            return Ok(vec![Vec::new(); set_a.len()]);
        }

        let radius = self.radius;
        let radius_sqr = radius * radius;

        // Bounding box of the candidate set; the upper corner is expanded
        // a bit to absorb round-off at the boundary.
        let mut lower = set_b[0];
        let mut upper = set_b[0];
        for p in &set_b[1..] {
            lower = lower.inf(p);
            upper = upper.sup(p);
        }
        upper += Vec3::new(radius, radius, radius) * 0.1;

        let mut grid = UniformGrid::new(lower, upper, radius);
        for (index, p) in set_b.iter().enumerate() {
            grid.insert(p, index);
        }

        let mut result = Vec::with_capacity(set_a.len());
        for p in set_a {
            let mut neighbors = Vec::new();
            let coords = grid.cell_coords(p);
            for dz in -1..=1 {
                let z = coords[2] + dz;
                if !grid.is_valid(2, z) {
                    continue;
                }
                for dy in -1..=1 {
                    let y = coords[1] + dy;
                    if !grid.is_valid(1, y) {
                        continue;
                    }
                    for dx in -1..=1 {
                        let x = coords[0] + dx;
                        if !grid.is_valid(0, x) {
                            continue;
                        }
                        for &q in &grid.cells[grid.cell_index([x, y, z])] {
                            if (p - set_b[q]).norm_squared() < radius_sqr {
                                neighbors.push(q);
                            }
                        }
                    }
                }
            }
            result.push(neighbors);
        }
        Ok(result)
    }
}
