// THEORY:
// The `PolygonMask` is a static spatial filter: a closed, simple polygon in frame
// coordinates. It is built once per run and then only read.
//
// Containment policy: a detection is inside the mask when the *centroid* of its
// bounding box lies inside the polygon or on its boundary. Partial overlap does not
// count. The centroid test is used because it is invariant under uniform scaling,
// which keeps mask and frame consistent when a resize factor is active.

use crate::core_modules::detection::BoundingBox;
use crate::error::{MagikError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonMask {
    vertices: Vec<(i32, i32)>,
}

impl PolygonMask {
    /// Parses a list like `"197,450 1276,463 1239,710 239,715"`. Spaces and commas
    /// are interchangeable separators.
    pub fn parse(raw: &str) -> Result<Self> {
        let numbers = raw
            .replace(' ', ",")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<i32>()
                    .map_err(|_| MagikError::DetectionInput(format!("mask coordinate {s:?} is not an integer")))
            })
            .collect::<Result<Vec<i32>>>()?;

        if numbers.len() % 2 != 0 {
            return Err(MagikError::DetectionInput(format!(
                "mask has an odd number of coordinates ({})",
                numbers.len()
            )));
        }
        let vertices = numbers.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        Self::new(vertices)
    }

    pub fn new(vertices: Vec<(i32, i32)>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(MagikError::DetectionInput(format!(
                "mask needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        let mask = Self { vertices };
        if mask.doubled_area() == 0 {
            return Err(MagikError::DetectionInput("mask polygon has zero area".into()));
        }
        if let Some((a, b)) = mask.first_self_intersection() {
            return Err(MagikError::DetectionInput(format!(
                "mask polygon is self-intersecting (edges {a} and {b})"
            )));
        }
        Ok(mask)
    }

    /// Derives a copy with every vertex multiplied by `factor` and truncated.
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        let vertices = self
            .vertices
            .iter()
            .map(|&(x, y)| ((x as f64 * factor) as i32, (y as f64 * factor) as i32))
            .collect();
        Self::new(vertices)
    }

    pub fn vertices(&self) -> &[(i32, i32)] {
        &self.vertices
    }

    pub fn contains(&self, bounding_box: &BoundingBox) -> bool {
        let (cx, cy) = bounding_box.centroid();
        self.contains_point(cx, cy)
    }

    /// Boundary-inclusive point-in-polygon test.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        for i in 0..n {
            let (x1, y1) = to_f64(self.vertices[i]);
            let (x2, y2) = to_f64(self.vertices[(i + 1) % n]);

            if on_segment((x1, y1), (x2, y2), (x, y)) {
                return true;
            }
            if (y1 > y) != (y2 > y) {
                let x_cross = x1 + (y - y1) * (x2 - x1) / (y2 - y1);
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn doubled_area(&self) -> i64 {
        let n = self.vertices.len();
        (0..n)
            .map(|i| {
                let (x1, y1) = self.vertices[i];
                let (x2, y2) = self.vertices[(i + 1) % n];
                x1 as i64 * y2 as i64 - x2 as i64 * y1 as i64
            })
            .sum::<i64>()
            .abs()
    }

    fn first_self_intersection(&self) -> Option<(usize, usize)> {
        let n = self.vertices.len();
        for i in 0..n {
            for j in (i + 1)..n {
                // Adjacent edges share a vertex by construction.
                if j == i + 1 || (i == 0 && j == n - 1) {
                    continue;
                }
                let a = (self.vertices[i], self.vertices[(i + 1) % n]);
                let b = (self.vertices[j], self.vertices[(j + 1) % n]);
                if segments_intersect(a, b) {
                    return Some((i, j));
                }
            }
        }
        None
    }
}

fn to_f64(p: (i32, i32)) -> (f64, f64) {
    (p.0 as f64, p.1 as f64)
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    if cross.abs() > 1e-9 {
        return false;
    }
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

fn orientation(a: (i32, i32), b: (i32, i32), c: (i32, i32)) -> i64 {
    let v = (b.0 as i64 - a.0 as i64) * (c.1 as i64 - a.1 as i64)
        - (b.1 as i64 - a.1 as i64) * (c.0 as i64 - a.0 as i64);
    v.signum()
}

fn within(a: (i32, i32), b: (i32, i32), p: (i32, i32)) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

fn segments_intersect(s1: ((i32, i32), (i32, i32)), s2: ((i32, i32), (i32, i32))) -> bool {
    let (p1, p2) = s1;
    let (q1, q2) = s2;
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 && o1 != 0 && o2 != 0 && o3 != 0 && o4 != 0 {
        return true;
    }
    (o1 == 0 && within(p1, p2, q1))
        || (o2 == 0 && within(p1, p2, q2))
        || (o3 == 0 && within(q1, q2, p1))
        || (o4 == 0 && within(q1, q2, p2))
}
