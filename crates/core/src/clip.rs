//! Geometry clipping to tile bounds.
//!
//! Tiles are half-open boxes `[x_min, x_max) × [y_min, y_max)`. Clipping intersects
//! with the closed box whose max edges are the largest doubles strictly below
//! `x_max` / `y_max`. A coordinate on a shared edge therefore lands in exactly one
//! tile (the one starting there), and tile-local quantized coordinates stay below
//! the tile size.
//!
//! Clipping keeps the dimension of its input:
//! - points clip to points (containment test)
//! - lines clip to line parts of positive length (geo `BooleanOps::clip`); a line
//!   that only touches the box, or runs along one of its max edges, yields nothing
//! - polygons clip to polygons: Sutherland-Hodgman for convex rings, geo
//!   `BooleanOps::intersection` otherwise, so a concave polygon cut into
//!   several pieces comes back as a `MultiPolygon`
//!
//! The overlay behind `BooleanOps` works on an integer grid. Its output is pulled
//! back onto exact values (input vertices, tile edges, exact edge crossings) and
//! clamped into the box before it is returned.
//!
//! Collections are clipped member by member and may come back mixed, which is what
//! [`extract_linear_components`] is for.

use geo::{
    Area, BooleanOps, BoundingRect, Coord, CoordsIter, Geometry, GeometryCollection, IsConvex, Line,
    LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect,
};

use crate::merge::merge_lines;
use crate::tile::TileBounds;

/// Largest double strictly less than `x`
pub fn next_down(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        return x;
    }
    if x == 0.0 {
        return -f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits - 1)
    } else {
        f64::from_bits(bits + 1)
    }
}

/// Closed box used for clipping: the half-open tile with its max edges pulled in
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClipBox {
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
    /// Exclusive tile edges the max edges were pulled in from
    x_end: f64,
    y_end: f64,
}

impl ClipBox {
    fn from_tile(bounds: &TileBounds) -> Self {
        Self {
            x_min: bounds.x_min,
            y_min: bounds.y_min,
            x_max: next_down(bounds.x_max),
            y_max: next_down(bounds.y_max),
            x_end: bounds.x_max,
            y_end: bounds.y_max,
        }
    }

    fn contains(&self, c: Coord<f64>) -> bool {
        c.x >= self.x_min && c.x <= self.x_max && c.y >= self.y_min && c.y <= self.y_max
    }

    fn clamp(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: c.x.clamp(self.x_min, self.x_max),
            y: c.y.clamp(self.y_min, self.y_max),
        }
    }

    fn overlaps(&self, rect: &Rect<f64>) -> bool {
        rect.max().x >= self.x_min
            && rect.min().x <= self.x_max
            && rect.max().y >= self.y_min
            && rect.min().y <= self.y_max
    }

    fn intersects_rect(&self, geom: &impl BoundingRect<f64, Output = Option<Rect<f64>>>) -> bool {
        geom.bounding_rect().is_some_and(|rect| self.overlaps(&rect))
    }

    fn contains_rect(&self, rect: &Rect<f64>) -> bool {
        rect.min().x >= self.x_min
            && rect.max().x <= self.x_max
            && rect.min().y >= self.y_min
            && rect.max().y <= self.y_max
    }

    fn to_polygon(self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.x_min,
                y: self.y_min,
            },
            Coord {
                x: self.x_max,
                y: self.y_max,
            },
        )
        .to_polygon()
    }
}

/// Pulls coordinates produced by the integer overlay back onto exact values.
///
/// A coordinate within tolerance of an input vertex becomes that vertex. Otherwise
/// each axis within tolerance of a tile edge is set to the edge, and the other axis
/// is recomputed from the input segment crossing that edge there.
struct CoordSnap {
    /// Input vertices sorted by x
    vertices: Vec<Coord<f64>>,
    segments: Vec<Line<f64>>,
    x_edges: [f64; 2],
    y_edges: [f64; 2],
    tolerance: f64,
}

impl CoordSnap {
    fn new(segments: Vec<Line<f64>>, clip_box: &ClipBox) -> Self {
        let mut vertices: Vec<Coord<f64>> = segments.iter().flat_map(|s| [s.start, s.end]).collect();
        vertices.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        vertices.dedup();

        // The overlay grid has at least 2^28 steps per half extent of the input
        // plus the box; the tolerance is 64 to 128 of those steps.
        let (mut lo_x, mut lo_y, mut hi_x, mut hi_y) =
            (clip_box.x_min, clip_box.y_min, clip_box.x_end, clip_box.y_end);
        for v in &vertices {
            lo_x = lo_x.min(v.x);
            lo_y = lo_y.min(v.y);
            hi_x = hi_x.max(v.x);
            hi_y = hi_y.max(v.y);
        }
        let half_extent = (hi_x - lo_x).max(hi_y - lo_y) / 2.0;

        Self {
            vertices,
            segments,
            x_edges: [clip_box.x_min, clip_box.x_end],
            y_edges: [clip_box.y_min, clip_box.y_end],
            tolerance: half_extent / 4_194_304.0,
        }
    }

    fn snap(&self, c: Coord<f64>) -> Coord<f64> {
        if let Some(vertex) = self.nearest_vertex(c) {
            return vertex;
        }

        let x_edge = self.x_edges.iter().copied().find(|e| (c.x - *e).abs() <= self.tolerance);
        let y_edge = self.y_edges.iter().copied().find(|e| (c.y - *e).abs() <= self.tolerance);
        match (x_edge, y_edge) {
            (Some(x), Some(y)) => Coord { x, y },
            (Some(x), None) => Coord {
                x,
                y: self.crossing(c.y, |s| (s.start.x, s.start.y, s.end.x, s.end.y), x),
            },
            (None, Some(y)) => Coord {
                x: self.crossing(c.x, |s| (s.start.y, s.start.x, s.end.y, s.end.x), y),
                y,
            },
            (None, None) => c,
        }
    }

    fn nearest_vertex(&self, c: Coord<f64>) -> Option<Coord<f64>> {
        let tol = self.tolerance;
        let start = self.vertices.partition_point(|v| v.x < c.x - tol);
        self.vertices[start..]
            .iter()
            .take_while(|v| v.x <= c.x + tol)
            .filter(|v| (v.y - c.y).abs() <= tol)
            .min_by(|a, b| {
                let da = (a.x - c.x).hypot(a.y - c.y);
                let db = (b.x - c.x).hypot(b.y - c.y);
                da.total_cmp(&db)
            })
            .copied()
    }

    /// Exact value of the free axis where an input segment crosses `edge`.
    ///
    /// `axes` maps a segment to `(fixed0, free0, fixed1, free1)`. Falls back to
    /// `approx` when no crossing lies within tolerance of it.
    fn crossing(&self, approx: f64, axes: impl Fn(&Line<f64>) -> (f64, f64, f64, f64), edge: f64) -> f64 {
        self.segments
            .iter()
            .filter_map(|s| {
                let (a, fa, b, fb) = axes(s);
                if a == b || (a - edge) * (b - edge) > 0.0 {
                    return None;
                }
                let t = (edge - a) / (b - a);
                Some(fa + t * (fb - fa))
            })
            .filter(|v| (v - approx).abs() <= self.tolerance)
            .min_by(|a, b| (a - approx).abs().total_cmp(&(b - approx).abs()))
            .unwrap_or(approx)
    }
}

/// Clip a geometry to a half-open tile box.
///
/// # Returns
///
/// The part of the geometry inside the tile, or `None` if nothing of the
/// geometry's own dimension remains.
pub fn clip_geometry(geom: &Geometry<f64>, bounds: &TileBounds) -> Option<Geometry<f64>> {
    let clip_box = ClipBox::from_tile(bounds);
    clip_with_box(geom, &clip_box)
}

fn clip_with_box(geom: &Geometry<f64>, clip_box: &ClipBox) -> Option<Geometry<f64>> {
    match geom {
        Geometry::Point(p) => clip_point(p, clip_box).map(Geometry::Point),
        Geometry::MultiPoint(mp) => {
            let points: Vec<Point<f64>> = mp.0.iter().filter_map(|p| clip_point(p, clip_box)).collect();
            match points.len() {
                0 => None,
                1 => Some(Geometry::Point(points[0])),
                _ => Some(Geometry::MultiPoint(MultiPoint::new(points))),
            }
        }
        Geometry::Line(line) => lines_to_geometry(clip_linestring(
            &LineString::new(vec![line.start, line.end]),
            clip_box,
        )),
        Geometry::LineString(ls) => lines_to_geometry(clip_linestring(ls, clip_box)),
        Geometry::MultiLineString(mls) => {
            if !clip_box.intersects_rect(mls) {
                return None;
            }
            let parts = mls.0.iter().flat_map(|ls| clip_linestring(ls, clip_box)).collect();
            lines_to_geometry(parts)
        }
        Geometry::Polygon(poly) => polygons_to_geometry(clip_polygon(poly, clip_box)),
        Geometry::MultiPolygon(mp) => {
            let polys = mp.0.iter().flat_map(|p| clip_polygon(p, clip_box)).collect();
            polygons_to_geometry(polys)
        }
        Geometry::Rect(rect) => polygons_to_geometry(clip_polygon(&rect.to_polygon(), clip_box)),
        Geometry::Triangle(tri) => polygons_to_geometry(clip_polygon(&tri.to_polygon(), clip_box)),
        Geometry::GeometryCollection(gc) => {
            let mut members = Vec::new();
            for member in &gc.0 {
                match clip_with_box(member, clip_box) {
                    Some(Geometry::GeometryCollection(nested)) => members.extend(nested.0),
                    Some(clipped) => members.push(clipped),
                    None => {}
                }
            }
            if members.is_empty() {
                None
            } else {
                Some(Geometry::GeometryCollection(GeometryCollection(members)))
            }
        }
    }
}

/// Keep only the line-typed members of a clipped collection.
///
/// Point and polygon fragments are dropped. Returns a single `LineString` when one
/// line remains, a `MultiLineString` for several, `None` for none.
pub fn extract_linear_components(gc: &GeometryCollection<f64>) -> Option<Geometry<f64>> {
    let mut lines = Vec::new();
    collect_lines(gc, &mut lines);
    lines_to_geometry(lines)
}

fn collect_lines(gc: &GeometryCollection<f64>, out: &mut Vec<LineString<f64>>) {
    for member in &gc.0 {
        match member {
            Geometry::LineString(ls) => out.push(ls.clone()),
            Geometry::Line(line) => out.push(LineString::new(vec![line.start, line.end])),
            Geometry::MultiLineString(mls) => out.extend(mls.0.iter().cloned()),
            Geometry::GeometryCollection(nested) => collect_lines(nested, out),
            Geometry::Point(_)
            | Geometry::MultiPoint(_)
            | Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => {}
        }
    }
}

fn lines_to_geometry(mut lines: Vec<LineString<f64>>) -> Option<Geometry<f64>> {
    match lines.len() {
        0 => None,
        1 => lines.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(lines))),
    }
}

fn polygons_to_geometry(mut polys: Vec<Polygon<f64>>) -> Option<Geometry<f64>> {
    match polys.len() {
        0 => None,
        1 => polys.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polys))),
    }
}

/// Clip a point to bounds (simple containment check)
fn clip_point(point: &Point<f64>, clip_box: &ClipBox) -> Option<Point<f64>> {
    if clip_box.contains(point.0) {
        Some(*point)
    } else {
        None
    }
}

/// Clip a linestring into the runs of positive length that lie inside the box.
///
/// Parts of the overlay output that meet end to end are joined back into one run,
/// and each run follows the direction of the input.
fn clip_linestring(ls: &LineString<f64>, clip_box: &ClipBox) -> Vec<LineString<f64>> {
    let Some(rect) = ls.bounding_rect() else {
        return Vec::new();
    };
    if !clip_box.overlaps(&rect) {
        return Vec::new();
    }

    // FAST PATH: fully inside, nothing to cut
    if clip_box.contains_rect(&rect) {
        return if ls.0.iter().any(|c| *c != ls.0[0]) {
            vec![ls.clone()]
        } else {
            Vec::new()
        };
    }

    // Only segments whose envelope reaches the box can contribute
    let segments: Vec<Line<f64>> = ls
        .lines()
        .filter(|s| s.start != s.end && clip_box.overlaps(&s.bounding_rect()))
        .collect();
    if segments.is_empty() {
        return Vec::new();
    }
    let subject = MultiLineString::new(chain_segments(&segments));

    let clipped = clip_box.to_polygon().clip(&subject, false);
    let snap = CoordSnap::new(segments, clip_box);

    let mut runs = Vec::new();
    for part in &clipped.0 {
        collect_inside_runs(part, clip_box, &snap, &mut runs);
    }
    join_runs(runs)
        .into_iter()
        .map(|run| orient_along(run, &snap.segments))
        .collect()
}

/// Reverse `run` if it travels against the input path.
fn orient_along(mut run: LineString<f64>, segments: &[Line<f64>]) -> LineString<f64> {
    let (Some(&first), Some(&last)) = (run.0.first(), run.0.last()) else {
        return run;
    };
    if path_position(first, segments) > path_position(last, segments) {
        run.0.reverse();
    }
    run
}

/// Where `c` sits along the input: index of the nearest segment, then the
/// fraction of that segment before it.
fn path_position(c: Coord<f64>, segments: &[Line<f64>]) -> (usize, f64) {
    let mut best = (f64::INFINITY, 0, 0.0);
    for (i, s) in segments.iter().enumerate() {
        let d = s.delta();
        let len2 = d.x * d.x + d.y * d.y;
        let t = (((c.x - s.start.x) * d.x + (c.y - s.start.y) * d.y) / len2).clamp(0.0, 1.0);
        let foot = Coord {
            x: s.start.x + t * d.x,
            y: s.start.y + t * d.y,
        };
        let dist = (c.x - foot.x).hypot(c.y - foot.y);
        if dist < best.0 {
            best = (dist, i, t);
        }
    }
    (best.1, best.2)
}

/// Consecutive segments that share an endpoint become one linestring.
fn chain_segments(segments: &[Line<f64>]) -> Vec<LineString<f64>> {
    let mut chains = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();
    for segment in segments {
        if current.last() != Some(&segment.start) {
            if current.len() >= 2 {
                chains.push(LineString::new(std::mem::take(&mut current)));
            }
            current.clear();
            current.push(segment.start);
        }
        current.push(segment.end);
    }
    if current.len() >= 2 {
        chains.push(LineString::new(current));
    }
    chains
}

/// Split one overlay output path into runs of segments inside the half-open tile.
///
/// A segment is kept when it has positive length and its midpoint is in the box;
/// segments lying along a max edge fail that test and cut the run.
fn collect_inside_runs(
    part: &LineString<f64>,
    clip_box: &ClipBox,
    snap: &CoordSnap,
    out: &mut Vec<LineString<f64>>,
) {
    let coords: Vec<Coord<f64>> = part.0.iter().map(|c| snap.snap(*c)).collect();
    let mut run: Vec<Coord<f64>> = Vec::new();

    for pair in coords.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a == b {
            continue;
        }
        let mid = Coord {
            x: a.x + (b.x - a.x) / 2.0,
            y: a.y + (b.y - a.y) / 2.0,
        };
        if clip_box.contains(mid) {
            push_distinct(&mut run, clip_box.clamp(a));
            push_distinct(&mut run, clip_box.clamp(b));
        } else {
            flush_run(&mut run, out);
        }
    }
    flush_run(&mut run, out);
}

fn push_distinct(run: &mut Vec<Coord<f64>>, c: Coord<f64>) {
    if run.last() != Some(&c) {
        run.push(c);
    }
}

fn flush_run(current: &mut Vec<Coord<f64>>, parts: &mut Vec<LineString<f64>>) {
    let run = std::mem::take(current);
    if run.len() >= 2 {
        parts.push(LineString::new(run));
    }
}

fn join_runs(runs: Vec<LineString<f64>>) -> Vec<LineString<f64>> {
    if runs.len() < 2 {
        return runs;
    }
    let geom = Geometry::MultiLineString(MultiLineString::new(runs));
    match merge_lines(&geom).unwrap_or(geom) {
        Geometry::LineString(ls) => vec![ls],
        Geometry::MultiLineString(mls) => mls.0,
        _ => Vec::new(),
    }
}

/// Clip a polygon to the box.
///
/// Convex rings without holes go through Sutherland-Hodgman. Everything else uses
/// `BooleanOps`, because Sutherland-Hodgman bridges the pieces of a concave
/// polygon along the box edge instead of separating them.
fn clip_polygon(poly: &Polygon<f64>, clip_box: &ClipBox) -> Vec<Polygon<f64>> {
    let Some(poly_rect) = poly.bounding_rect() else {
        return Vec::new();
    };
    if !clip_box.overlaps(&poly_rect) {
        return Vec::new();
    }

    // FAST PATH: fully inside, nothing to cut
    if clip_box.contains_rect(&poly_rect) {
        return vec![poly.clone()];
    }

    if poly.interiors().is_empty() && poly.exterior().is_convex() {
        return clip_polygon_sutherland_hodgman(poly, clip_box).into_iter().collect();
    }

    log::trace!(
        "using BooleanOps for non-convex polygon with {} rings",
        poly.interiors().len() + 1
    );
    clip_polygon_boolean_ops(poly, clip_box)
}

/// Sutherland-Hodgman for a convex ring. A result with zero area is dropped.
fn clip_polygon_sutherland_hodgman(poly: &Polygon<f64>, clip_box: &ClipBox) -> Option<Polygon<f64>> {
    let exterior = sutherland_hodgman_clip(poly.exterior(), clip_box);
    if exterior.0.len() < 4 {
        return None;
    }

    let clipped = Polygon::new(exterior, Vec::new());
    if clipped.unsigned_area() == 0.0 {
        return None;
    }
    Some(clipped)
}

/// Intersect with the box polygon; each output piece is snapped, clamped and
/// dropped if it collapses.
fn clip_polygon_boolean_ops(poly: &Polygon<f64>, clip_box: &ClipBox) -> Vec<Polygon<f64>> {
    let result: MultiPolygon<f64> = poly.intersection(&clip_box.to_polygon());

    let segments: Vec<Line<f64>> = std::iter::once(poly.exterior())
        .chain(poly.interiors())
        .flat_map(|ring| ring.lines())
        .filter(|s| s.start != s.end)
        .collect();
    let snap = CoordSnap::new(segments, clip_box);

    result
        .0
        .iter()
        .filter_map(|piece| {
            let exterior = repair_ring(piece.exterior(), clip_box, &snap)?;
            let interiors = piece
                .interiors()
                .iter()
                .filter_map(|ring| repair_ring(ring, clip_box, &snap))
                .collect();
            let repaired = Polygon::new(exterior, interiors);
            (repaired.unsigned_area() > 0.0).then_some(repaired)
        })
        .collect()
}

/// Snap and clamp a ring; `None` when fewer than three distinct vertices remain.
fn repair_ring(ring: &LineString<f64>, clip_box: &ClipBox, snap: &CoordSnap) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.coords_count());
    for c in ring.coords() {
        push_distinct(&mut coords, clip_box.clamp(snap.snap(*c)));
    }
    while coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }
    // Polygon::new closes the ring again
    Some(LineString::new(coords))
}

/// Sutherland-Hodgman polygon clipping for an axis-aligned box.
fn sutherland_hodgman_clip(ring: &LineString<f64>, clip_box: &ClipBox) -> LineString<f64> {
    // Work on the open ring
    let mut output: Vec<Coord<f64>> = ring.0.clone();
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }

    let ClipBox {
        x_min,
        y_min,
        x_max,
        y_max,
        ..
    } = *clip_box;

    // Left edge
    output = clip_against_edge(
        &output,
        |c| c.x >= x_min,
        |c1, c2| {
            let t = (x_min - c1.x) / (c2.x - c1.x);
            Coord {
                x: x_min,
                y: c1.y + t * (c2.y - c1.y),
            }
        },
    );

    // Right edge
    output = clip_against_edge(
        &output,
        |c| c.x <= x_max,
        |c1, c2| {
            let t = (x_max - c1.x) / (c2.x - c1.x);
            Coord {
                x: x_max,
                y: c1.y + t * (c2.y - c1.y),
            }
        },
    );

    // Bottom edge
    output = clip_against_edge(
        &output,
        |c| c.y >= y_min,
        |c1, c2| {
            let t = (y_min - c1.y) / (c2.y - c1.y);
            Coord {
                x: c1.x + t * (c2.x - c1.x),
                y: y_min,
            }
        },
    );

    // Top edge
    output = clip_against_edge(
        &output,
        |c| c.y <= y_max,
        |c1, c2| {
            let t = (y_max - c1.y) / (c2.y - c1.y);
            Coord {
                x: c1.x + t * (c2.x - c1.x),
                y: y_max,
            }
        },
    );

    let mut output: Vec<Coord<f64>> = output.into_iter().map(|c| clip_box.clamp(c)).collect();

    // Close the ring
    if !output.is_empty() {
        output.push(output[0]);
    }

    LineString::new(output)
}

/// Clip polygon vertices against a single edge
fn clip_against_edge<F, I>(vertices: &[Coord<f64>], inside: F, intersect: I) -> Vec<Coord<f64>>
where
    F: Fn(&Coord<f64>) -> bool,
    I: Fn(&Coord<f64>, &Coord<f64>) -> Coord<f64>,
{
    if vertices.is_empty() {
        return Vec::new();
    }

    let mut output = Vec::with_capacity(vertices.len());

    for i in 0..vertices.len() {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % vertices.len()];

        let current_inside = inside(current);
        let next_inside = inside(next);

        if current_inside {
            output.push(*current);
            if !next_inside {
                // Exiting: add intersection
                output.push(intersect(current, next));
            }
        } else if next_inside {
            // Entering: add intersection
            output.push(intersect(current, next));
        }
    }

    output
}
