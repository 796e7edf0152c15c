use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::commons::geojson_io::write_table;
use crate::commons::paths::DATA_PATH;
use crate::geo_core::GeoCore;
use crate::geometric::raster::{extract_tree_polygons, RasterMask};
use crate::geometric::table::GeoTable;
use crate::geometric::vector;

/// Vegetation structure
/// Turns the tree classifier mask into canopy polygons and their buffers
pub struct Vegetation {
    /// Reprojected tree mask GeoTIFF
    mask_path: PathBuf,
    /// Output path for processed data
    output_path: PathBuf,
    /// GeoCore for CRS handling, taken from the mask
    pub geo_core: GeoCore,
    /// Polygons at or below this area are dropped
    min_area: f64,
    /// Merge all canopy polygons into one feature
    dissolve: bool,
    /// Simplification tolerance, 0 keeps the pixel outline
    simplify_tolerance: f64,
    /// Extracted canopy polygons
    polygons: Option<GeoTable>,
}

impl Vegetation {
    /// Create a new Vegetation instance reading `mask_path`
    pub fn new(
        mask_path: impl Into<PathBuf>,
        output_path: Option<PathBuf>,
        min_area: f64,
        dissolve: bool,
    ) -> Self {
        Vegetation {
            mask_path: mask_path.into(),
            output_path: output_path.unwrap_or_else(|| PathBuf::from(DATA_PATH)),
            geo_core: GeoCore::unknown(),
            min_area,
            dissolve,
            simplify_tolerance: 0.0,
            polygons: None,
        }
    }

    /// Wrap polygons produced by an earlier run
    pub fn from_polygons(polygons: GeoTable, output_path: Option<PathBuf>) -> Self {
        Vegetation {
            mask_path: PathBuf::new(),
            output_path: output_path.unwrap_or_else(|| PathBuf::from(DATA_PATH)),
            geo_core: polygons.geo_core(),
            min_area: 0.0,
            dissolve: false,
            simplify_tolerance: 0.0,
            polygons: Some(polygons),
        }
    }

    /// Simplify the polygons after filtering and dissolving
    pub fn with_simplify(mut self, tolerance: f64) -> Self {
        self.simplify_tolerance = tolerance;
        self
    }

    /// Run vegetation processing: polygonize the mask, filter, optionally dissolve and simplify
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    pub fn run_internal(&mut self) -> Result<()> {
        let raster = RasterMask::from_geotiff(&self.mask_path)?;
        self.geo_core = raster.geo_core();

        let mut polygons = extract_tree_polygons(&raster)
            .with_context(|| format!("Failed to vectorize tree mask {:?}", self.mask_path))?;
        if self.min_area > 0.0 {
            polygons = vector::filter_by_min_area(&polygons, self.min_area)?;
        }
        if self.dissolve {
            polygons = vector::dissolve(&polygons)?;
        }
        if self.simplify_tolerance > 0.0 {
            polygons = vector::simplify(&polygons, self.simplify_tolerance)?;
        }

        info!(
            "Vegetation: {} canopy polygons from {} canopy pixels",
            polygons.len(),
            raster.foreground_count()
        );
        self.polygons = Some(polygons);
        Ok(())
    }

    pub fn get_polygons(&self) -> Option<&GeoTable> {
        self.polygons.as_ref()
    }

    /// Canopy polygons expanded by `distance`
    pub fn buffer(&self, distance: f64) -> Result<GeoTable> {
        let polygons = self
            .polygons
            .as_ref()
            .context("No tree polygons available. Call run() first.")?;
        Ok(vector::buffer(polygons, distance)?.with_name("tree_buffers"))
    }

    /// Save the polygons as `{output_path}/{name}.geojson`
    pub fn to_geojson(&self, name: Option<&str>) -> Result<PathBuf> {
        let polygons = self
            .polygons
            .as_ref()
            .context("No tree polygons available. Call run() first.")?;
        let output_file = self
            .output_path
            .join(format!("{}.geojson", name.unwrap_or("vegetation")));
        write_table(polygons, &output_file)?;
        info!("Vegetation saved to: {:?}", output_file);
        Ok(output_file)
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::GeoTransform;
    use crate::geometric::raster::TREE_VALUE;
    use geo::Area;

    fn write_mask(dir: &Path) -> PathBuf {
        // One 2x2 patch and one lone pixel
        let mut data = vec![0u8; 36];
        for idx in [7, 8, 13, 14, 28] {
            data[idx] = TREE_VALUE;
        }
        let raster = RasterMask::new(
            6,
            6,
            data,
            GeoTransform::from_origin(500.0, 1000.0, 1.0, 1.0),
            GeoCore::new(32610),
        )
        .unwrap();
        let path = dir.join("mask.tif");
        raster.to_geotiff(&path).unwrap();
        path
    }

    #[test]
    fn test_run_extracts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mask = write_mask(dir.path());

        let vegetation = Vegetation::new(&mask, Some(dir.path().to_path_buf()), 0.0, false)
            .run()
            .unwrap();
        assert_eq!(vegetation.get_polygons().unwrap().len(), 2);
        assert_eq!(vegetation.geo_core, GeoCore::new(32610));

        let vegetation = Vegetation::new(&mask, None, 1.0, false).run().unwrap();
        let polygons = vegetation.get_polygons().unwrap();
        assert_eq!(polygons.len(), 1);
        let area = polygons.features()[0].geometry.as_ref().unwrap().unsigned_area();
        assert!((area - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_dissolve_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let mask = write_mask(dir.path());

        let vegetation = Vegetation::new(&mask, Some(dir.path().to_path_buf()), 0.0, true)
            .run()
            .unwrap();
        assert_eq!(vegetation.get_polygons().unwrap().len(), 1);

        let output = vegetation.to_geojson(Some("trees")).unwrap();
        assert!(output.ends_with("trees.geojson"));
        assert!(output.is_file());
    }

    #[test]
    fn test_simplify_keeps_square_patches() {
        let dir = tempfile::tempdir().unwrap();
        let mask = write_mask(dir.path());

        let vegetation = Vegetation::new(&mask, None, 0.0, false)
            .with_simplify(0.1)
            .run()
            .unwrap();
        let polygons = vegetation.get_polygons().unwrap();
        assert_eq!(polygons.len(), 2);
        let total: f64 = polygons
            .iter()
            .map(|f| f.geometry.as_ref().unwrap().unsigned_area())
            .sum();
        assert!((total - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_requires_run() {
        let vegetation = Vegetation::new("missing.tif", None, 0.0, false);
        assert!(vegetation.buffer(1.0).is_err());
        assert!(Vegetation::new("missing.tif", None, 0.0, false).run().is_err());
    }
}
