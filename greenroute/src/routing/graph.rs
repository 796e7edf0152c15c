use log::{debug, info};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::commons::config::{DuplicateEdgePolicy, RoutingPreference};
use crate::error::{GreenRouteError, Result};
use crate::routing::network::{select_edges, EdgeRecord, NodeRecord};

/// Arc payload: the costs of one edge record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeCost {
    /// Row of the edge record in its source table
    pub row: usize,
    pub weight: f64,
    pub length: f64,
}

impl EdgeCost {
    pub fn cost(&self, preference: RoutingPreference) -> f64 {
        match preference {
            RoutingPreference::Shortest => self.length,
            RoutingPreference::Greenest => self.weight,
        }
    }
}

/// Directed street graph keyed by `osmid`
#[derive(Debug, Clone)]
pub struct RoutingGraph {
    graph: DiGraph<NodeRecord, EdgeCost>,
    index: HashMap<i64, NodeIndex>,
}

fn check_cost(edge: &EdgeRecord, field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(GreenRouteError::invalid_parameter(
            field,
            format!(
                "edge ({}, {}) at row {} has {} {}; costs must be finite and >= 0",
                edge.u, edge.v, edge.row, field, value
            ),
        ))
    }
}

impl RoutingGraph {
    /// One vertex per node, one arc `u -> v` per edge record.
    ///
    /// No reverse arc is added. Under `Reject`, repeated `(u, v)` pairs fail;
    /// under `KeepMinimum` parallel arcs are kept and the search takes the
    /// cheapest, which is also the record [`select_edges`] picks.
    pub fn build(
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
        policy: DuplicateEdgePolicy,
    ) -> Result<Self> {
        if policy == DuplicateEdgePolicy::Reject {
            select_edges(edges, RoutingPreference::default(), policy)?;
        }

        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if index.contains_key(&node.osmid) {
                return Err(GreenRouteError::invalid_parameter(
                    "osmid",
                    format!("node {} appears more than once", node.osmid),
                ));
            }
            index.insert(node.osmid, graph.add_node(*node));
        }

        for edge in edges {
            check_cost(edge, "length", edge.length)?;
            check_cost(edge, "weight", edge.weight)?;
            let u = *index.get(&edge.u).ok_or(GreenRouteError::UnknownNode(edge.u))?;
            let v = *index.get(&edge.v).ok_or(GreenRouteError::UnknownNode(edge.v))?;
            graph.add_edge(
                u,
                v,
                EdgeCost {
                    row: edge.row,
                    weight: edge.weight,
                    length: edge.length,
                },
            );
        }

        info!(
            "Routing graph built: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(RoutingGraph { graph, index })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, osmid: i64) -> bool {
        self.index.contains_key(&osmid)
    }

    pub fn node(&self, osmid: i64) -> Option<&NodeRecord> {
        self.index.get(&osmid).map(|&i| &self.graph[i])
    }

    fn node_index(&self, osmid: i64) -> Result<NodeIndex> {
        self.index
            .get(&osmid)
            .copied()
            .ok_or(GreenRouteError::UnknownNode(osmid))
    }

    /// Least-cost node sequence from `source` to `target`, both included.
    /// Dijkstra search (A* with a zero heuristic) on the `preference` field.
    pub fn shortest_path(
        &self,
        source: i64,
        target: i64,
        preference: RoutingPreference,
    ) -> Result<Vec<i64>> {
        let start = self.node_index(source)?;
        let goal = self.node_index(target)?;

        let (cost, path) = astar(
            &self.graph,
            start,
            |n| n == goal,
            |e| e.weight().cost(preference),
            |_| 0.0,
        )
        .ok_or(GreenRouteError::NoPath {
            from: source,
            to: target,
        })?;

        debug!(
            "Path {} -> {} by {}: {} nodes, cost {}",
            source,
            target,
            preference,
            path.len(),
            cost
        );
        Ok(path.into_iter().map(|i| self.graph[i].osmid).collect())
    }
}
