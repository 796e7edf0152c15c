use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::commons::paths::DATA_PATH;
use crate::error::{GreenRouteError, Result};
use crate::geo_core::BoundingBox;

/// Edge attribute minimised by the path search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoutingPreference {
    /// Minimise total `length`
    #[serde(rename = "length", alias = "shortest")]
    Shortest,
    /// Minimise total green `weight`
    #[default]
    #[serde(rename = "weight", alias = "greenest")]
    Greenest,
}

impl RoutingPreference {
    /// Name of the edge column holding the cost
    pub fn field(&self) -> &'static str {
        match self {
            RoutingPreference::Shortest => "length",
            RoutingPreference::Greenest => "weight",
        }
    }
}

impl fmt::Display for RoutingPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field())
    }
}

/// What to do when several edge records share the same `(u, v)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateEdgePolicy {
    /// Fail with `DuplicateEdge`
    Reject,
    /// Keep the cheapest record for the routing preference, earliest row on ties
    #[default]
    KeepMinimum,
}

fn default_resolution() -> f64 {
    0.6
}

fn default_tree_buffer() -> f64 {
    1.0
}

fn default_road_buffer() -> f64 {
    2.5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DATA_PATH)
}

/// Parameters of one pipeline run, read from a JSON file and passed to every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Area of interest name, prefix of every dataset file
    pub aoi_name: String,
    pub sw_lat: f64,
    pub sw_lon: f64,
    pub ne_lat: f64,
    pub ne_lon: f64,
    /// Imagery resolution in meters per pixel
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Start node (`osmid`)
    #[serde(default)]
    pub routing_source: Option<i64>,
    /// End node (`osmid`)
    #[serde(default)]
    pub routing_target: Option<i64>,
    #[serde(default)]
    pub routing_weight: RoutingPreference,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Buffer around tree polygons, CRS units
    #[serde(default = "default_tree_buffer")]
    pub tree_buffer: f64,
    /// Buffer around road segments, CRS units
    #[serde(default = "default_road_buffer")]
    pub road_buffer: f64,
    /// Tree polygons at or below this area are dropped
    #[serde(default)]
    pub min_tree_area: f64,
    /// Merge all tree polygons before buffering
    #[serde(default)]
    pub dissolve_trees: bool,
    /// Simplification tolerance for tree polygons (CRS units²), 0 keeps the pixel outline
    #[serde(default)]
    pub simplify_tolerance: f64,
    #[serde(default)]
    pub duplicate_edges: DuplicateEdgePolicy,
}

impl RunConfig {
    /// Config with default processing parameters
    pub fn new(aoi_name: &str, bbox: BoundingBox) -> Self {
        RunConfig {
            aoi_name: aoi_name.to_string(),
            sw_lat: bbox.sw_lat,
            sw_lon: bbox.sw_lon,
            ne_lat: bbox.ne_lat,
            ne_lon: bbox.ne_lon,
            resolution: default_resolution(),
            routing_source: None,
            routing_target: None,
            routing_weight: RoutingPreference::default(),
            data_dir: default_data_dir(),
            tree_buffer: default_tree_buffer(),
            road_buffer: default_road_buffer(),
            min_tree_area: 0.0,
            dissolve_trees: false,
            simplify_tolerance: 0.0,
            duplicate_edges: DuplicateEdgePolicy::default(),
        }
    }

    /// Read and validate a JSON config file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        info!("User input created: {}", config.aoi_name);
        Ok(config)
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.sw_lat, self.sw_lon, self.ne_lat, self.ne_lon)
    }

    /// Source and target nodes, both required for routing
    pub fn route_endpoints(&self) -> Result<(i64, i64)> {
        match (self.routing_source, self.routing_target) {
            (Some(s), Some(t)) => Ok((s, t)),
            _ => Err(GreenRouteError::invalid_parameter(
                "routing endpoints",
                "routing_source and routing_target must both be set",
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.aoi_name.trim().is_empty()
            || self.aoi_name.contains(['/', '\\'])
            || self.aoi_name.starts_with('.')
        {
            return Err(GreenRouteError::invalid_parameter(
                "AOI name",
                format!("'{}' cannot be used as a file prefix", self.aoi_name),
            ));
        }
        self.bbox().validate()?;
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(GreenRouteError::invalid_parameter(
                "resolution",
                format!("resolution must be positive, got {}", self.resolution),
            ));
        }
        for (parameter, distance) in [
            ("tree buffer distance", self.tree_buffer),
            ("road buffer distance", self.road_buffer),
        ] {
            if !(distance.is_finite() && distance > 0.0) {
                return Err(GreenRouteError::invalid_parameter(
                    parameter,
                    format!("distance must be strictly positive and finite, got {}", distance),
                ));
            }
        }
        if !(self.min_tree_area.is_finite() && self.min_tree_area >= 0.0) {
            return Err(GreenRouteError::invalid_parameter(
                "minimum area",
                format!("min_tree_area must be finite and >= 0, got {}", self.min_tree_area),
            ));
        }
        if !(self.simplify_tolerance.is_finite() && self.simplify_tolerance >= 0.0) {
            return Err(GreenRouteError::invalid_parameter(
                "simplify tolerance",
                format!(
                    "simplify_tolerance must be finite and >= 0, got {}",
                    self.simplify_tolerance
                ),
            ));
        }
        Ok(())
    }
}
