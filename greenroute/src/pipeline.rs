use anyhow::{Context, Result};
use log::{debug, info};
use std::fmt;

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::commons::config::{DuplicateEdgePolicy, RoutingPreference, RunConfig};
use crate::commons::geojson_io::{read_table, write_table};
use crate::commons::paths::{AoiPaths, Dataset};
use crate::error::GreenRouteError;
use crate::geometric::greendex::{compute_greendex, BUFFER_AREA_COLUMN, OVERLAP_AREA_COLUMN};
use crate::geometric::road::Road;
use crate::geometric::table::GeoTable;
use crate::geometric::vector;
use crate::geometric::vegetation::Vegetation;
use crate::routing::graph::RoutingGraph;
use crate::routing::network::{edges_from_table, fill_missing_geometry, nodes_from_table};
use crate::routing::route::{
    aggregate_route_stats, edges_along_path, merge_route_geometry, orient_from, EdgeLookup,
    Route,
};

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>2}/{len:2} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Vector processing of one AOI: tree mask to per-edge green index.
///
/// Every stage reads its inputs from the data directory and writes its output
/// there. A stage whose output already exists is skipped unless `force` is set.
pub struct ProcessVectors<'a> {
    config: &'a RunConfig,
    paths: AoiPaths,
    force: bool,
}

impl<'a> ProcessVectors<'a> {
    pub fn new(config: &'a RunConfig, force: bool) -> Self {
        ProcessVectors {
            config,
            paths: AoiPaths::new(&config.data_dir, &config.aoi_name),
            force,
        }
    }

    pub fn paths(&self) -> &AoiPaths {
        &self.paths
    }

    fn load(&self, dataset: Dataset) -> Result<GeoTable> {
        read_table(&self.paths.path(dataset), &dataset.table_name())
    }

    /// Reuse the stored output of a stage, or compute and store it
    fn checkpoint<F>(&self, dataset: Dataset, compute: F) -> Result<GeoTable>
    where
        F: FnOnce() -> Result<GeoTable>,
    {
        let path = self.paths.path(dataset);
        if !self.force && self.paths.exists(dataset) {
            info!("Skipping {}: {:?} already exists", dataset.table_name(), path);
            return self.load(dataset);
        }

        let table = compute()?.with_name(dataset.table_name());
        write_table(&table, &path)
            .with_context(|| format!("Failed to save {}", dataset.table_name()))?;
        info!("Saved {} ({} features) to {:?}", dataset.table_name(), table.len(), path);
        Ok(table)
    }

    /// Raster to vector: canopy polygons from the tree mask
    pub fn extract_tree_polygons(&self) -> Result<GeoTable> {
        self.checkpoint(Dataset::TreePolygons, || {
            let vegetation = Vegetation::new(
                self.paths.path(Dataset::TreeMask),
                Some(self.paths.data_dir().to_path_buf()),
                self.config.min_tree_area,
                self.config.dissolve_trees,
            )
            .with_simplify(self.config.simplify_tolerance)
            .run()?;
            vegetation
                .get_polygons()
                .cloned()
                .context("Vegetation produced no polygons")
        })
    }

    /// Buffers around trees
    pub fn tree_buffer(&self) -> Result<GeoTable> {
        self.checkpoint(Dataset::TreeBuffers, || {
            let polygons = self.load(Dataset::TreePolygons)?;
            Vegetation::from_polygons(polygons, None).buffer(self.config.tree_buffer)
        })
    }

    /// Numbered road edges and the buffers along them
    pub fn road_buffer(&self) -> Result<GeoTable> {
        self.checkpoint(Dataset::EdgesWithIds, || {
            let road = Road::new(self.paths.path(Dataset::RoadEdges), None).run()?;
            road.get_edges().cloned().context("Road produced no edges")
        })?;
        self.checkpoint(Dataset::RoadBuffers, || {
            let edges = self.load(Dataset::EdgesWithIds)?;
            Road::from_edges(edges, None).buffer(self.config.road_buffer)
        })
    }

    /// Road buffers clipped by tree buffers
    pub fn clip_roads(&self) -> Result<GeoTable> {
        self.checkpoint(Dataset::ClippedBuffers, || {
            let roads = self.load(Dataset::RoadBuffers)?;
            let trees = self.load(Dataset::TreeBuffers)?;
            Ok(vector::clip(&roads, &trees)?)
        })
    }

    /// Buffer and overlap areas joined onto the edges, then greendex and weight
    pub fn calculate_areas(&self) -> Result<GeoTable> {
        self.checkpoint(Dataset::EdgesGreendex, || {
            edge_greendex(
                &self.load(Dataset::EdgesWithIds)?,
                &self.load(Dataset::RoadBuffers)?,
                &self.load(Dataset::ClippedBuffers)?,
            )
        })
    }

    /// Run every stage in order; returns the edge table with `greendex` and `weight`
    pub fn process_vectors(&self) -> Result<GeoTable> {
        info!("Processing vectors for AOI '{}'", self.paths.aoi());

        let stages: [(&'static str, fn(&Self) -> Result<GeoTable>); 5] = [
            ("tree polygons", Self::extract_tree_polygons),
            ("tree buffers", Self::tree_buffer),
            ("road buffers", Self::road_buffer),
            ("clipped buffers", Self::clip_roads),
            ("greendex", Self::calculate_areas),
        ];

        #[cfg(feature = "indicatif")]
        let pb = {
            let pb = ProgressBar::new(stages.len() as u64);
            pb.set_style(progress_style());
            pb
        };

        let mut result = None;
        for (label, stage) in stages {
            #[cfg(feature = "indicatif")]
            pb.set_message(label);
            debug!("Stage: {}", label);
            result = Some(stage(self).with_context(|| format!("Stage '{}' failed", label))?);
            #[cfg(feature = "indicatif")]
            pb.inc(1);
        }

        #[cfg(feature = "indicatif")]
        pb.finish_with_message("Vectors processed");

        result.context("No stage was run")
    }
}

/// Join the road-buffer area into `area_x` and the canopy overlap into
/// `area_y` of the numbered edges, then add `greendex` and `weight`
pub fn edge_greendex(
    edges: &GeoTable,
    road_buffers: &GeoTable,
    clipped: &GeoTable,
) -> Result<GeoTable> {
    let buffer_area = vector::compute_area(road_buffers)?;
    let overlap_area = vector::compute_area(clipped)?;

    let joined = vector::join_area_into(edges, &buffer_area, BUFFER_AREA_COLUMN)?;
    let joined = vector::join_area_into(&joined, &overlap_area, OVERLAP_AREA_COLUMN)?;
    Ok(compute_greendex(&joined)?)
}

/// Progress of one routing run; a failure names the stage that was not reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStage {
    GraphBuilt,
    PathFound,
    EdgesResolved,
    GeometryMerged,
    StatsAggregated,
}

impl fmt::Display for RoutingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoutingStage::GraphBuilt => "graph_built",
            RoutingStage::PathFound => "path_found",
            RoutingStage::EdgesResolved => "edges_resolved",
            RoutingStage::GeometryMerged => "geometry_merged",
            RoutingStage::StatsAggregated => "stats_aggregated",
        };
        write!(f, "{}", name)
    }
}

fn failed_before(stage: RoutingStage) -> String {
    format!("Routing failed before reaching '{}'", stage)
}

/// Route from `source` to `target` over the node and edge tables
pub fn compute_route(
    nodes: &GeoTable,
    edges: &GeoTable,
    source: i64,
    target: i64,
    preference: RoutingPreference,
    policy: DuplicateEdgePolicy,
) -> Result<Route> {
    if let (Some(_), Some(_)) = (nodes.geo_core().get_epsg(), edges.geo_core().get_epsg()) {
        if nodes.geo_core() != edges.geo_core() {
            return Err(GreenRouteError::CrsMismatch {
                input: edges.name().to_string(),
                input_crs: edges.geo_core().label(),
                mask: nodes.name().to_string(),
                mask_crs: nodes.geo_core().label(),
            }
            .into());
        }
    }

    let node_records = nodes_from_table(nodes).context(failed_before(RoutingStage::GraphBuilt))?;
    let mut edge_records =
        edges_from_table(edges).context(failed_before(RoutingStage::GraphBuilt))?;
    fill_missing_geometry(&mut edge_records, &node_records);

    let graph = RoutingGraph::build(&node_records, &edge_records, policy)
        .context(failed_before(RoutingStage::GraphBuilt))?;
    debug!("Routing stage: {}", RoutingStage::GraphBuilt);

    let path = graph
        .shortest_path(source, target, preference)
        .context(failed_before(RoutingStage::PathFound))?;
    debug!("Routing stage: {}", RoutingStage::PathFound);

    let lookup = EdgeLookup::new(&edge_records, preference, policy)
        .context(failed_before(RoutingStage::EdgesResolved))?;
    let ordered = edges_along_path(&path, &lookup).context(failed_before(RoutingStage::EdgesResolved))?;
    debug!("Routing stage: {}", RoutingStage::EdgesResolved);

    let merged =
        merge_route_geometry(&ordered).context(failed_before(RoutingStage::GeometryMerged))?;
    let geometry = match graph.node(source) {
        Some(node) => orient_from(merged, node.coord()),
        None => merged,
    };
    debug!("Routing stage: {}", RoutingStage::GeometryMerged);

    let stats = aggregate_route_stats(&ordered);
    debug!("Routing stage: {}", RoutingStage::StatsAggregated);

    Ok(Route {
        preference,
        edges: ordered.into_iter().cloned().collect(),
        nodes: path,
        geometry,
        stats,
    })
}

/// Route between the configured endpoints and save it as `{aoi}_route_{field}`.
///
/// Returns `None` when the route file exists and `force` is not set. Nothing
/// is written when any routing stage fails.
pub fn run_routing(config: &RunConfig, force: bool) -> Result<Option<Route>> {
    let (source, target) = config.route_endpoints()?;
    let paths = AoiPaths::new(&config.data_dir, &config.aoi_name);
    let output = Dataset::Route(config.routing_weight);
    let output_path = paths.path(output);

    if !force && paths.exists(output) {
        info!("Skipping routing: {:?} already exists", output_path);
        return Ok(None);
    }

    let nodes = read_table(&paths.path(Dataset::Nodes), &Dataset::Nodes.table_name())?;
    let edges = read_table(
        &paths.path(Dataset::EdgesGreendex),
        &Dataset::EdgesGreendex.table_name(),
    )?;

    let route = compute_route(
        &nodes,
        &edges,
        source,
        target,
        config.routing_weight,
        config.duplicate_edges,
    )?;
    write_table(&route.to_table(edges.geo_core()), &output_path)?;

    info!(
        "Route {} -> {} by {}: {} edges, weight {:.4}, length {:.2} saved to {:?}",
        source,
        target,
        config.routing_weight,
        route.edges.len(),
        route.stats.total_weight,
        route.stats.total_length,
        output_path
    );
    Ok(Some(route))
}

/// Vector processing followed by routing
pub fn run_pipeline(config: &RunConfig, force: bool) -> Result<Option<Route>> {
    ProcessVectors::new(config, force).process_vectors()?;
    run_routing(config, force)
}
