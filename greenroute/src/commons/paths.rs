use std::path::{Path, PathBuf};

use crate::commons::config::RoutingPreference;

/// Default directory holding the datasets of every AOI
pub const DATA_PATH: &str = "./data/raw";

pub fn get_data_path() -> PathBuf {
    PathBuf::from(DATA_PATH)
}

/// Every dataset read or written for one AOI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    /// Classifier output, reprojected
    TreeMask,
    /// Street segments, reprojected
    RoadEdges,
    /// Street graph vertices
    Nodes,
    TreePolygons,
    TreeBuffers,
    EdgesWithIds,
    RoadBuffers,
    ClippedBuffers,
    EdgesGreendex,
    Route(RoutingPreference),
}

impl Dataset {
    /// File name of the dataset for `aoi`
    pub fn file_name(&self, aoi: &str) -> String {
        match self {
            Dataset::TreeMask => format!("{}_tree_mask_reprojected.tif", aoi),
            Dataset::RoadEdges => format!("{}_edges_reprojected.geojson", aoi),
            Dataset::Nodes => format!("{}_nodes.geojson", aoi),
            Dataset::TreePolygons => format!("{}_tree_mask_polygons_reproj.geojson", aoi),
            Dataset::TreeBuffers => format!("{}_tree_buffer_polygons_reproj.geojson", aoi),
            Dataset::EdgesWithIds => format!("{}_edges_id_reprojected.geojson", aoi),
            Dataset::RoadBuffers => format!("{}_edges_buffer_reproj.geojson", aoi),
            Dataset::ClippedBuffers => format!("{}_edges_buffer_clipped.geojson", aoi),
            Dataset::EdgesGreendex => format!("{}_edges_greendex.geojson", aoi),
            Dataset::Route(pref) => format!("{}_route_{}.geojson", aoi, pref.field()),
        }
    }

    /// Table name used in logs and error messages
    pub fn table_name(&self) -> String {
        match self {
            Dataset::TreeMask => "tree_mask".to_string(),
            Dataset::RoadEdges => "edges".to_string(),
            Dataset::Nodes => "nodes".to_string(),
            Dataset::TreePolygons => "tree_polygons".to_string(),
            Dataset::TreeBuffers => "tree_buffers".to_string(),
            Dataset::EdgesWithIds => "edges_id".to_string(),
            Dataset::RoadBuffers => "edges_buffer".to_string(),
            Dataset::ClippedBuffers => "edges_buffer_clipped".to_string(),
            Dataset::EdgesGreendex => "edges_greendex".to_string(),
            Dataset::Route(pref) => format!("route_{}", pref.field()),
        }
    }
}

/// Dataset locations of one AOI inside a data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AoiPaths {
    data_dir: PathBuf,
    aoi: String,
}

impl AoiPaths {
    pub fn new(data_dir: impl Into<PathBuf>, aoi: &str) -> Self {
        AoiPaths {
            data_dir: data_dir.into(),
            aoi: aoi.to_string(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn aoi(&self) -> &str {
        &self.aoi
    }

    pub fn path(&self, dataset: Dataset) -> PathBuf {
        self.data_dir.join(dataset.file_name(&self.aoi))
    }

    /// A present output marks its stage as done
    pub fn exists(&self, dataset: Dataset) -> bool {
        self.path(dataset).is_file()
    }
}
