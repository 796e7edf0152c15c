use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::commons::geojson_io::{read_table, write_table};
use crate::commons::paths::DATA_PATH;
use crate::geo_core::GeoCore;
use crate::geometric::table::GeoTable;
use crate::geometric::vector;

/// Road structure
/// Loads the reprojected street segments and prepares them for the canopy overlay
pub struct Road {
    /// Street segments GeoJSON
    edges_path: PathBuf,
    /// Output path for processed data
    output_path: PathBuf,
    /// GeoCore for CRS handling
    pub geo_core: GeoCore,
    /// Segments with sequential `id`
    edges: Option<GeoTable>,
}

impl Road {
    pub fn new(edges_path: impl Into<PathBuf>, output_path: Option<PathBuf>) -> Self {
        Road {
            edges_path: edges_path.into(),
            output_path: output_path.unwrap_or_else(|| PathBuf::from(DATA_PATH)),
            geo_core: GeoCore::unknown(),
            edges: None,
        }
    }

    /// Wrap an edge table that already carries ids
    pub fn from_edges(edges: GeoTable, output_path: Option<PathBuf>) -> Self {
        Road {
            edges_path: PathBuf::new(),
            output_path: output_path.unwrap_or_else(|| PathBuf::from(DATA_PATH)),
            geo_core: edges.geo_core(),
            edges: Some(edges),
        }
    }

    /// Run road processing: read the segments, check their fields, number them 1..N
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    pub fn run_internal(&mut self) -> Result<()> {
        let edges = read_table(&self.edges_path, "edges")?;
        for field in ["u", "v", "length"] {
            edges
                .require_column(field)
                .with_context(|| format!("Invalid road edges {:?}", self.edges_path))?;
        }

        self.geo_core = edges.geo_core();
        let edges = vector::assign_sequential_ids(&edges);
        info!(
            "Road: {} segments loaded ({})",
            edges.len(),
            self.geo_core.label()
        );
        self.edges = Some(edges);
        Ok(())
    }

    pub fn get_edges(&self) -> Option<&GeoTable> {
        self.edges.as_ref()
    }

    /// Segments expanded by `distance`, keeping `id`
    pub fn buffer(&self, distance: f64) -> Result<GeoTable> {
        let edges = self
            .edges
            .as_ref()
            .context("No road edges available. Call run() first.")?;
        Ok(vector::buffer(edges, distance)?.with_name("edges_buffer"))
    }

    /// Save the numbered segments as `{output_path}/{name}.geojson`
    pub fn to_geojson(&self, name: Option<&str>) -> Result<PathBuf> {
        let edges = self
            .edges
            .as_ref()
            .context("No road edges available. Call run() first.")?;
        let output_file = self
            .output_path
            .join(format!("{}.geojson", name.unwrap_or("routes")));
        write_table(edges, &output_file)?;
        info!("Road saved to: {:?}", output_file);
        Ok(output_file)
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::table::GeoFeature;
    use geo::{line_string, Area, Geometry};

    fn write_edges(dir: &Path, with_length: bool) -> PathBuf {
        let mut table = GeoTable::new("edges", GeoCore::new(32610));
        for (u, v, y) in [(1, 2, 0.0), (2, 3, 10.0)] {
            let mut feature = GeoFeature::new(Geometry::LineString(
                line_string![(x: 0.0, y: y), (x: 10.0, y: y)],
            ))
            .with_property("u", u)
            .with_property("v", v)
            .with_property("id", 99);
            if with_length {
                feature = feature.with_property("length", 10.0);
            }
            table.push(feature);
        }
        let path = dir.join("edges.geojson");
        write_table(&table, &path).unwrap();
        path
    }

    #[test]
    fn test_run_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        let road = Road::new(write_edges(dir.path(), true), Some(dir.path().to_path_buf()))
            .run()
            .unwrap();

        let edges = road.get_edges().unwrap();
        let ids: Vec<_> = edges.iter().filter_map(|f| f.get_i64("id")).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(road.geo_core, GeoCore::new(32610));

        let buffers = road.buffer(2.5).unwrap();
        assert_eq!(buffers.len(), 2);
        assert!(buffers.iter().all(|f| f.geometry.as_ref().unwrap().unsigned_area() > 50.0));

        let saved = road.to_geojson(None).unwrap();
        assert!(saved.ends_with("routes.geojson"));
    }

    #[test]
    fn test_run_requires_length() {
        let dir = tempfile::tempdir().unwrap();
        let result = Road::new(write_edges(dir.path(), false), None).run();
        let err = result.err().unwrap();
        assert!(format!("{:#}", err).contains("missing required field 'length'"));
    }
}
