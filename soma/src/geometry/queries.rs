use crate::Vec3;

/// Feature of a triangle owning a closest point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriangleRegion {
    VertexA,
    VertexB,
    VertexC,
    EdgeAB,
    EdgeAC,
    EdgeBC,
    Interior,
}

/// Closest point on triangle `(a, b, c)` to `p`, with the Voronoi region
/// it falls in.
pub fn closest_point_on_triangle(
    p: &Vec3,
    a: &Vec3,
    b: &Vec3,
    c: &Vec3,
) -> (Vec3, TriangleRegion) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, TriangleRegion::VertexA);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, TriangleRegion::VertexB);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, TriangleRegion::EdgeAB);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, TriangleRegion::VertexC);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, TriangleRegion::EdgeAC);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, TriangleRegion::EdgeBC);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, TriangleRegion::Interior)
}
