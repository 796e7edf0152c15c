use geo::{Coord, Geometry, LineString};
use log::debug;
use std::collections::HashMap;

use crate::commons::config::{DuplicateEdgePolicy, RoutingPreference};
use crate::error::{GreenRouteError, Result};
use crate::geometric::table::GeoTable;

/// Street graph vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRecord {
    pub osmid: i64,
    pub x: f64,
    pub y: f64,
}

impl NodeRecord {
    pub fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

/// Directed street segment with its routing costs
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    /// Row of the record in its source table
    pub row: usize,
    pub u: i64,
    pub v: i64,
    pub length: f64,
    pub weight: f64,
    pub geometry: Option<LineString<f64>>,
}

impl EdgeRecord {
    /// Cost of traversing the edge under `preference`
    pub fn cost(&self, preference: RoutingPreference) -> f64 {
        match preference {
            RoutingPreference::Shortest => self.length,
            RoutingPreference::Greenest => self.weight,
        }
    }
}

/// Read nodes from a table with `osmid` and either `x`/`y` columns or point geometries
pub fn nodes_from_table(table: &GeoTable) -> Result<Vec<NodeRecord>> {
    table.require_column("osmid")?;
    let use_columns = table.has_column("x") && table.has_column("y");

    let mut nodes = Vec::with_capacity(table.len());
    for (row, feature) in table.iter().enumerate() {
        let osmid = feature.get_i64("osmid").ok_or_else(|| {
            GreenRouteError::invalid_parameter(
                "osmid",
                format!("row {} of '{}' has no integer osmid", row, table.name()),
            )
        })?;

        let position = if use_columns {
            feature.get_f64("x").zip(feature.get_f64("y"))
        } else {
            match &feature.geometry {
                Some(Geometry::Point(p)) => Some((p.x(), p.y())),
                _ => None,
            }
        };
        let (x, y) = position.ok_or_else(|| {
            GreenRouteError::invalid_parameter(
                "node position",
                format!(
                    "node {} (row {} of '{}') has neither x/y values nor a point geometry",
                    osmid,
                    row,
                    table.name()
                ),
            )
        })?;
        nodes.push(NodeRecord { osmid, x, y });
    }
    Ok(nodes)
}

fn line_of(geometry: &Geometry<f64>) -> Option<LineString<f64>> {
    match geometry {
        Geometry::LineString(ls) => Some(ls.clone()),
        Geometry::Line(l) => Some((*l).into()),
        Geometry::MultiLineString(mls) => {
            let mut coords: Vec<Coord<f64>> = Vec::new();
            for part in mls.iter() {
                for c in part.coords() {
                    if coords.last() != Some(c) {
                        coords.push(*c);
                    }
                }
            }
            if coords.len() >= 2 {
                Some(LineString::from(coords))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Read edges from a table carrying `u`, `v`, `length` and `weight`.
/// Null geometries stay `None` until [`fill_missing_geometry`].
pub fn edges_from_table(table: &GeoTable) -> Result<Vec<EdgeRecord>> {
    for field in ["u", "v", "length", "weight"] {
        table.require_column(field)?;
    }

    let mut edges = Vec::with_capacity(table.len());
    for (row, feature) in table.iter().enumerate() {
        let endpoint = |field: &'static str| {
            feature.get_i64(field).ok_or_else(|| {
                GreenRouteError::invalid_parameter(
                    field,
                    format!("row {} of '{}' has no integer {}", row, table.name(), field),
                )
            })
        };
        let cost = |field: &'static str| {
            feature.get_f64(field).ok_or_else(|| {
                GreenRouteError::invalid_parameter(
                    field,
                    format!("row {} of '{}' has no numeric {}", row, table.name(), field),
                )
            })
        };

        edges.push(EdgeRecord {
            row,
            u: endpoint("u")?,
            v: endpoint("v")?,
            length: cost("length")?,
            weight: cost("weight")?,
            geometry: feature.geometry.as_ref().and_then(line_of),
        });
    }
    Ok(edges)
}

/// Give edges without geometry a straight line between their end nodes.
/// Returns the number of edges filled.
pub fn fill_missing_geometry(edges: &mut [EdgeRecord], nodes: &[NodeRecord]) -> usize {
    let by_id: HashMap<i64, &NodeRecord> = nodes.iter().map(|n| (n.osmid, n)).collect();
    let mut filled = 0;
    for edge in edges.iter_mut().filter(|e| e.geometry.is_none()) {
        if let (Some(u), Some(v)) = (by_id.get(&edge.u), by_id.get(&edge.v)) {
            edge.geometry = Some(LineString::from(vec![u.coord(), v.coord()]));
            filled += 1;
        }
    }
    if filled > 0 {
        debug!("Filled {} missing edge geometries with straight lines", filled);
    }
    filled
}

/// Choose one record per `(u, v)` pair.
///
/// `Reject` fails on the first repeated pair. `KeepMinimum` keeps the record
/// with the lowest cost for `preference`, the earliest one on ties.
/// Returns, per pair, the position of the chosen record in `edges`.
pub fn select_edges(
    edges: &[EdgeRecord],
    preference: RoutingPreference,
    policy: DuplicateEdgePolicy,
) -> Result<HashMap<(i64, i64), usize>> {
    let mut chosen: HashMap<(i64, i64), usize> = HashMap::with_capacity(edges.len());
    for (pos, edge) in edges.iter().enumerate() {
        match chosen.get(&(edge.u, edge.v)) {
            None => {
                chosen.insert((edge.u, edge.v), pos);
            }
            Some(&kept) => match policy {
                DuplicateEdgePolicy::Reject => {
                    return Err(GreenRouteError::DuplicateEdge {
                        u: edge.u,
                        v: edge.v,
                        first_row: edges[kept].row,
                        second_row: edge.row,
                    })
                }
                DuplicateEdgePolicy::KeepMinimum => {
                    if edge.cost(preference) < edges[kept].cost(preference) {
                        chosen.insert((edge.u, edge.v), pos);
                    }
                }
            },
        }
    }
    Ok(chosen)
}
