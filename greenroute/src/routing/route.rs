use geo::{Coord, Geometry, LineString};
use log::debug;
use std::collections::HashMap;

use crate::commons::config::{DuplicateEdgePolicy, RoutingPreference};
use crate::error::{GeometryProblem, GreenRouteError, Result, TableRole};
use crate::geo_core::GeoCore;
use crate::geometric::table::{GeoFeature, GeoTable};
use crate::routing::network::{select_edges, EdgeRecord};

/// Distance under which two edge endpoints are the same point
pub const JOIN_TOLERANCE: f64 = 1e-6;

/// `(u, v)` index over edge records, built with the same duplicate policy as the graph
#[derive(Debug)]
pub struct EdgeLookup<'a> {
    index: HashMap<(i64, i64), &'a EdgeRecord>,
}

impl<'a> EdgeLookup<'a> {
    pub fn new(
        edges: &'a [EdgeRecord],
        preference: RoutingPreference,
        policy: DuplicateEdgePolicy,
    ) -> Result<Self> {
        let index = select_edges(edges, preference, policy)?
            .into_iter()
            .map(|(pair, pos)| (pair, &edges[pos]))
            .collect();
        Ok(EdgeLookup { index })
    }

    pub fn get(&self, u: i64, v: i64) -> Option<&'a EdgeRecord> {
        self.index.get(&(u, v)).copied()
    }
}

/// Edge records joining consecutive path nodes, in path order
pub fn edges_along_path<'a>(path: &[i64], lookup: &EdgeLookup<'a>) -> Result<Vec<&'a EdgeRecord>> {
    path.windows(2)
        .map(|pair| {
            lookup.get(pair[0], pair[1]).ok_or(GreenRouteError::EdgeNotFound {
                u: pair[0],
                v: pair[1],
            })
        })
        .collect()
}

fn near(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).hypot(a.y - b.y) <= JOIN_TOLERANCE
}

fn edge_line<'e>(edge: &'e EdgeRecord) -> Result<&'e LineString<f64>> {
    match &edge.geometry {
        Some(line) if line.0.len() >= 2 => Ok(line),
        _ => Err(GreenRouteError::InvalidGeometry {
            role: TableRole::Input,
            table: "edges".to_string(),
            problem: GeometryProblem::Null,
            rows: vec![edge.row],
        }),
    }
}

/// Chain edge geometries into one line.
///
/// Stored geometries may run against the path direction; each one is
/// flipped as needed so that consecutive pieces share an endpoint.
pub fn merge_route_geometry(edges: &[&EdgeRecord]) -> Result<LineString<f64>> {
    let Some((first, rest)) = edges.split_first() else {
        return Err(GreenRouteError::EmptyResult(
            "Cannot merge an empty edge list".to_string(),
        ));
    };

    let mut coords: Vec<Coord<f64>> = edge_line(first)?.0.clone();

    // Orient the first piece towards the second
    if let Some(second) = rest.first() {
        let next = edge_line(second)?;
        let (start, end) = (next.0[0], next.0[next.0.len() - 1]);
        let tail = coords[coords.len() - 1];
        if !near(tail, start) && !near(tail, end) {
            if near(coords[0], start) || near(coords[0], end) {
                coords.reverse();
            } else {
                return Err(GreenRouteError::DisconnectedRoute {
                    position: 1,
                    u: second.u,
                    v: second.v,
                });
            }
        }
    }

    for (i, edge) in rest.iter().enumerate() {
        let line = edge_line(edge)?;
        let tail = coords[coords.len() - 1];
        if near(tail, line.0[0]) {
            coords.extend(line.0.iter().skip(1));
        } else if near(tail, line.0[line.0.len() - 1]) {
            coords.extend(line.0.iter().rev().skip(1));
        } else {
            return Err(GreenRouteError::DisconnectedRoute {
                position: i + 1,
                u: edge.u,
                v: edge.v,
            });
        }
    }

    debug!("Merged {} edges into {} vertices", edges.len(), coords.len());
    Ok(LineString::from(coords))
}

/// Reverse `line` when its end lies closer to `start` than its beginning.
/// A single-edge route has no neighbour to orient against.
pub fn orient_from(line: LineString<f64>, start: Coord<f64>) -> LineString<f64> {
    let (Some(first), Some(last)) = (line.0.first(), line.0.last()) else {
        return line;
    };
    let distance = |c: &Coord<f64>| (c.x - start.x).hypot(c.y - start.y);
    if distance(last) < distance(first) {
        let mut coords = line.0;
        coords.reverse();
        LineString::from(coords)
    } else {
        line
    }
}

/// Totals over the edges of a route
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RouteStats {
    pub total_weight: f64,
    pub total_length: f64,
}

pub fn aggregate_route_stats(edges: &[&EdgeRecord]) -> RouteStats {
    edges.iter().fold(RouteStats::default(), |acc, e| RouteStats {
        total_weight: acc.total_weight + e.weight,
        total_length: acc.total_length + e.length,
    })
}

/// A computed route
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub preference: RoutingPreference,
    pub nodes: Vec<i64>,
    pub edges: Vec<EdgeRecord>,
    pub geometry: LineString<f64>,
    pub stats: RouteStats,
}

impl Route {
    /// One-row table with `weight`, `length` and the route line
    pub fn to_table(&self, geo_core: GeoCore) -> GeoTable {
        let feature = GeoFeature::new(Geometry::LineString(self.geometry.clone()))
            .with_property("weight", self.stats.total_weight)
            .with_property("length", self.stats.total_length);
        GeoTable::from_features(
            format!("route_{}", self.preference.field()),
            geo_core,
            vec![feature],
        )
    }
}
