use carte_shared::{Extent, Geometry, Position};

use crate::record::FeatureRecord;

const GRID_COLS: usize = 50;
const GRID_ROWS: usize = 50;

/// A flat 2D grid over a layer's features for hit-testing without scanning
/// every feature. Rebuilt whenever the layer's feature set or a geometry changes.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cells: Vec<Vec<usize>>,
    extents: Vec<Extent>,
    bounds: Extent,
    cell_w: f64,
    cell_h: f64,
}

impl SpatialGrid {
    pub fn empty() -> Self {
        Self {
            cells: Vec::new(),
            extents: Vec::new(),
            bounds: Extent::EMPTY,
            cell_w: 1.0,
            cell_h: 1.0,
        }
    }

    pub fn build(records: &[FeatureRecord]) -> Self {
        let extents: Vec<Extent> = records.iter().map(|r| r.geometry.extent()).collect();

        let mut bounds = Extent::EMPTY;
        for extent in extents.iter().filter(|e| e.is_finite()) {
            bounds.merge(extent);
        }
        if !bounds.is_finite() {
            return Self::empty();
        }

        // Pad so single points and degenerate lines still span a cell
        let bounds = bounds.buffered(1.0);
        let cell_w = bounds.width() / GRID_COLS as f64;
        let cell_h = bounds.height() / GRID_ROWS as f64;

        let mut grid = Self {
            cells: vec![Vec::new(); GRID_COLS * GRID_ROWS],
            extents,
            bounds,
            cell_w,
            cell_h,
        };

        for idx in 0..grid.extents.len() {
            let extent = grid.extents[idx];
            if !extent.is_finite() {
                continue;
            }
            let (col_start, row_start) = grid.cell_of(extent.min_x, extent.min_y);
            let (col_end, row_end) = grid.cell_of(extent.max_x, extent.max_y);
            for row in row_start..=row_end {
                for col in col_start..=col_end {
                    grid.cells[row * GRID_COLS + col].push(idx);
                }
            }
        }

        grid
    }

    /// Bounding extent of everything indexed, or `None` if empty.
    pub fn world_bounds(&self) -> Option<Extent> {
        (!self.cells.is_empty()).then_some(self.bounds)
    }

    fn cell_of(&self, x: f64, y: f64) -> (usize, usize) {
        let col = ((x - self.bounds.min_x) / self.cell_w).floor().max(0.0) as usize;
        let row = ((y - self.bounds.min_y) / self.cell_h).floor().max(0.0) as usize;
        (col.min(GRID_COLS - 1), row.min(GRID_ROWS - 1))
    }

    /// Indices of features whose extent, grown by `tolerance`, contains `at`.
    /// Topmost (highest index) first.
    pub fn candidates(&self, at: Position, tolerance: f64) -> Vec<usize> {
        if self.cells.is_empty() || !self.bounds.buffered(tolerance).contains(at) {
            return Vec::new();
        }

        let (col_start, row_start) = self.cell_of(at.x - tolerance, at.y - tolerance);
        let (col_end, row_end) = self.cell_of(at.x + tolerance, at.y + tolerance);

        let mut found = Vec::new();
        for row in row_start..=row_end {
            for col in col_start..=col_end {
                for &idx in &self.cells[row * GRID_COLS + col] {
                    if self.extents[idx].buffered(tolerance).contains(at) {
                        found.push(idx);
                    }
                }
            }
        }
        found.sort_unstable_by(|a, b| b.cmp(a));
        found.dedup();
        found
    }
}

/// Whether `at` touches `geometry`: within `point_tolerance` of a point,
/// within `tolerance` of a line, or inside / near the boundary of a polygon.
pub fn geometry_hit(geometry: &Geometry, at: Position, tolerance: f64, point_tolerance: f64) -> bool {
    match geometry {
        Geometry::Point(p) => distance(*p, at) <= point_tolerance,
        Geometry::MultiPoint(points) => points.iter().any(|p| distance(*p, at) <= point_tolerance),
        Geometry::LineString(line) => near_line(line, at, tolerance),
        Geometry::MultiLineString(lines) => lines.iter().any(|l| near_line(l, at, tolerance)),
        Geometry::Polygon(rings) => polygon_hit(rings, at, tolerance),
        Geometry::MultiPolygon(polygons) => polygons.iter().any(|r| polygon_hit(r, at, tolerance)),
    }
}

fn distance(a: Position, b: Position) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn segment_distance(a: Position, b: Position, p: Position) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return distance(a, p);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    distance(Position::new(a.x + t * dx, a.y + t * dy), p)
}

fn near_line(line: &[Position], at: Position, tolerance: f64) -> bool {
    match line {
        [] => false,
        [only] => distance(*only, at) <= tolerance,
        _ => line
            .windows(2)
            .any(|pair| segment_distance(pair[0], pair[1], at) <= tolerance),
    }
}

/// Even-odd crossing test.
fn ring_contains(ring: &[Position], at: Position) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > at.y) != (b.y > at.y) && at.x < (b.x - a.x) * (at.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn polygon_hit(rings: &[Vec<Position>], at: Position, tolerance: f64) -> bool {
    let Some((exterior, holes)) = rings.split_first() else {
        return false;
    };
    if rings.iter().any(|ring| near_line(ring, at, tolerance)) {
        return true;
    }
    ring_contains(exterior, at) && !holes.iter().any(|hole| ring_contains(hole, at))
}

#[cfg(test)]
mod tests {
    use carte_shared::PropertyMap;

    use super::*;

    fn record(geometry: Geometry) -> FeatureRecord {
        FeatureRecord::drawn(geometry, PropertyMap::new(), "test")
    }

    fn square(min: f64, max: f64) -> Vec<Position> {
        vec![
            Position::new(min, min),
            Position::new(max, min),
            Position::new(max, max),
            Position::new(min, max),
            Position::new(min, min),
        ]
    }

    #[test]
    fn empty_grid_finds_nothing() {
        let grid = SpatialGrid::build(&[]);
        assert!(grid.world_bounds().is_none());
        assert!(grid.candidates(Position::new(0.0, 0.0), 10.0).is_empty());
    }

    #[test]
    fn candidates_are_topmost_first() {
        let records = vec![
            record(Geometry::Polygon(vec![square(0.0, 100.0)])),
            record(Geometry::Point(Position::new(50.0, 50.0))),
            record(Geometry::Point(Position::new(500.0, 500.0))),
        ];
        let grid = SpatialGrid::build(&records);
        assert_eq!(grid.candidates(Position::new(50.0, 50.0), 2.0), vec![1, 0]);
        assert_eq!(grid.candidates(Position::new(499.0, 501.0), 2.0), vec![2]);
        assert!(grid.candidates(Position::new(300.0, 300.0), 2.0).is_empty());
    }

    #[test]
    fn polygon_hit_respects_holes() {
        let donut = Geometry::Polygon(vec![square(0.0, 100.0), square(40.0, 60.0)]);
        assert!(geometry_hit(&donut, Position::new(10.0, 10.0), 1.0, 1.0));
        assert!(!geometry_hit(&donut, Position::new(50.0, 50.0), 1.0, 1.0));
        assert!(geometry_hit(&donut, Position::new(40.5, 50.0), 1.0, 1.0));
        assert!(!geometry_hit(&donut, Position::new(150.0, 50.0), 1.0, 1.0));
    }

    #[test]
    fn line_hit_uses_segment_distance() {
        let line = Geometry::LineString(vec![Position::new(0.0, 0.0), Position::new(100.0, 0.0)]);
        assert!(geometry_hit(&line, Position::new(50.0, 3.0), 5.0, 5.0));
        assert!(!geometry_hit(&line, Position::new(50.0, 8.0), 5.0, 5.0));
        assert!(!geometry_hit(&line, Position::new(110.0, 0.0), 5.0, 5.0));
    }

    #[test]
    fn point_hit_uses_point_tolerance() {
        let point = Geometry::Point(Position::new(0.0, 0.0));
        assert!(geometry_hit(&point, Position::new(6.0, 0.0), 1.0, 6.0));
        assert!(!geometry_hit(&point, Position::new(6.0, 0.0), 1.0, 5.0));
    }
}
