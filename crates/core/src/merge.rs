//! Best-effort line merging.
//!
//! Joins the parts of a `MultiLineString` wherever exactly two part ends meet at
//! a node, reversing parts as needed so each merged chain runs in one direction.
//! Nodes where three or more ends meet (junctions) stay split.
//!
//! Merging is cosmetic. When nothing can be joined the result is
//! [`MergeOutcome::NoMerge`] and callers keep the geometry they had.

use std::collections::HashMap;

use geo::{Coord, Geometry, LineString, MultiLineString};

/// Result of a merge attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Fewer parts than before; a `LineString` when everything joined into one chain
    Merged(Geometry<f64>),
    /// Not line-typed, a single part already, or no two parts share a free end
    NoMerge,
}

impl MergeOutcome {
    /// The merged geometry, or `original` when no merge happened
    pub fn unwrap_or(self, original: Geometry<f64>) -> Geometry<f64> {
        match self {
            MergeOutcome::Merged(geom) => geom,
            MergeOutcome::NoMerge => original,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged(_))
    }
}

/// Attempt to merge contiguous line parts into the fewest linestrings.
pub fn merge_lines(geom: &Geometry<f64>) -> MergeOutcome {
    match geom {
        Geometry::MultiLineString(mls) => merge_multi_linestring(mls),
        Geometry::Point(_)
        | Geometry::Line(_)
        | Geometry::LineString(_)
        | Geometry::Polygon(_)
        | Geometry::MultiPoint(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_)
        | Geometry::GeometryCollection(_) => MergeOutcome::NoMerge,
    }
}

/// Exact coordinate identity for node lookup
type NodeKey = (u64, u64);

fn node_key(c: &Coord<f64>) -> NodeKey {
    (c.x.to_bits(), c.y.to_bits())
}

fn merge_multi_linestring(mls: &MultiLineString<f64>) -> MergeOutcome {
    let parts: Vec<&LineString<f64>> = mls.0.iter().filter(|ls| !ls.0.is_empty()).collect();
    if parts.len() < 2 {
        return MergeOutcome::NoMerge;
    }

    // Part indices incident to each node; a closed part appears twice at its node
    let mut incidence: HashMap<NodeKey, Vec<usize>> = HashMap::new();
    for (i, part) in parts.iter().enumerate() {
        for end in [part.0[0], part.0[part.0.len() - 1]] {
            incidence.entry(node_key(&end)).or_default().push(i);
        }
    }

    let mut used = vec![false; parts.len()];
    let mut chains: Vec<LineString<f64>> = Vec::new();

    for start in 0..parts.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut chain: Vec<Coord<f64>> = parts[start].0.clone();

        extend_chain(&mut chain, &parts, &incidence, &mut used);
        chain.reverse();
        extend_chain(&mut chain, &parts, &incidence, &mut used);
        chain.reverse();

        chains.push(LineString::new(chain));
    }

    if chains.len() >= parts.len() {
        return MergeOutcome::NoMerge;
    }

    if chains.len() == 1 {
        MergeOutcome::Merged(Geometry::LineString(chains.remove(0)))
    } else {
        MergeOutcome::Merged(Geometry::MultiLineString(MultiLineString::new(chains)))
    }
}

/// Append unused parts at the chain's tail while the tail node has degree two.
fn extend_chain(
    chain: &mut Vec<Coord<f64>>,
    parts: &[&LineString<f64>],
    incidence: &HashMap<NodeKey, Vec<usize>>,
    used: &mut [bool],
) {
    loop {
        let Some(tail) = chain.last().copied() else {
            return;
        };
        let Some(incident) = incidence.get(&node_key(&tail)) else {
            return;
        };
        if incident.len() != 2 {
            return;
        }
        let Some(&next) = incident.iter().find(|&&i| !used[i]) else {
            return;
        };
        used[next] = true;

        let coords = &parts[next].0;
        if node_key(&coords[0]) == node_key(&tail) {
            chain.extend(coords.iter().skip(1).copied());
        } else {
            chain.extend(coords.iter().rev().skip(1).copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point};

    #[test]
    fn test_merge_two_touching_parts() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 1.0)],
        ]));
        assert_eq!(
            merge_lines(&mls),
            MergeOutcome::Merged(Geometry::LineString(line_string![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 2.0, y: 1.0),
            ]))
        );
    }

    #[test]
    fn test_merge_reverses_parts() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 2.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: -1.0, y: 0.0), (x: 0.0, y: 0.0)],
        ]));
        match merge_lines(&mls) {
            MergeOutcome::Merged(Geometry::LineString(ls)) => {
                assert_eq!(ls.0.len(), 4);
                assert_eq!(ls.0[0], Coord { x: -1.0, y: 0.0 });
                assert_eq!(ls.0[3], Coord { x: 2.0, y: 0.0 });
            }
            other => panic!("Expected single merged line, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_disjoint_parts_is_no_merge() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0)],
        ]));
        assert_eq!(merge_lines(&mls), MergeOutcome::NoMerge);
    }

    #[test]
    fn test_merge_stops_at_junction() {
        // Three parts meeting at (1,0): nothing joins there
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
        ]));
        assert_eq!(merge_lines(&mls), MergeOutcome::NoMerge);
    }

    #[test]
    fn test_merge_partial_leaves_multilinestring() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
            line_string![(x: 9.0, y: 9.0), (x: 9.0, y: 10.0)],
        ]));
        match merge_lines(&mls) {
            MergeOutcome::Merged(Geometry::MultiLineString(out)) => assert_eq!(out.0.len(), 2),
            other => panic!("Expected partial merge, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_closed_loop() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            line_string![(x: 1.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0)],
        ]));
        match merge_lines(&mls) {
            MergeOutcome::Merged(Geometry::LineString(ls)) => {
                assert_eq!(ls.0.len(), 5);
                assert_eq!(ls.0.first(), ls.0.last());
            }
            other => panic!("Expected closed merged line, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_non_line_kinds_is_no_merge() {
        assert_eq!(merge_lines(&Geometry::Point(point!(x: 1.0, y: 1.0))), MergeOutcome::NoMerge);
        let ls = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]);
        assert_eq!(merge_lines(&ls), MergeOutcome::NoMerge);
        assert_eq!(MergeOutcome::NoMerge.unwrap_or(ls.clone()), ls);
    }
}
