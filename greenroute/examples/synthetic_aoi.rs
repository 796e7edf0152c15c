use anyhow::Result;
use geo::{point, Geometry, LineString};

use greenroute::commons::geojson_io::write_table;
use greenroute::commons::paths::{AoiPaths, Dataset};
use greenroute::geo_core::{BoundingBox, GeoCore, GeoTransform};
use greenroute::geometric::raster::{RasterMask, TREE_VALUE};
use greenroute::pipeline::run_pipeline;
use greenroute::{GeoFeature, GeoTable, RoutingPreference, RunConfig};

/// Example: green routing on a synthetic AOI
/// A 200 m square block, trees along its southern and eastern streets
fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("=== Example: Green routing on a synthetic block ===\n");

    let workdir = tempfile::tempdir()?;
    let paths = AoiPaths::new(workdir.path(), "synthetic");
    let crs = GeoCore::new(32610);

    // Tree mask: 220x220 pixels at 1 m, origin (-10, 210)
    let size = 220usize;
    let mut data = vec![0u8; size * size];
    for col in 30..190 {
        for row in 205..208 {
            data[row * size + col] = TREE_VALUE;
        }
    }
    for row in 30..190 {
        for col in 212..215 {
            data[row * size + col] = TREE_VALUE;
        }
    }
    let mask = RasterMask::new(size, size, data, GeoTransform::from_origin(-10.0, 210.0, 1.0, 1.0), crs)?;
    mask.to_geotiff(&paths.path(Dataset::TreeMask))?;

    // Street graph: the four corners of the block plus a diagonal shortcut
    let corners = [(1, 0.0, 0.0), (2, 200.0, 0.0), (3, 0.0, 200.0), (4, 200.0, 200.0)];
    let mut nodes = GeoTable::new("nodes", crs);
    for (osmid, x, y) in corners {
        nodes.push(GeoFeature::new(Geometry::Point(point!(x: x, y: y))).with_property("osmid", osmid));
    }
    write_table(&nodes, &paths.path(Dataset::Nodes))?;

    let mut edges = GeoTable::new("edges", crs);
    for (u, v, length) in [(1, 2, 200.0), (2, 4, 200.0), (1, 3, 200.0), (3, 4, 200.0), (4, 1, 120.0)] {
        let (_, ux, uy) = corners[u as usize - 1];
        let (_, vx, vy) = corners[v as usize - 1];
        edges.push(
            GeoFeature::new(Geometry::LineString(LineString::from(vec![(ux, uy), (vx, vy)])))
                .with_property("u", u)
                .with_property("v", v)
                .with_property("length", length),
        );
    }
    write_table(&edges, &paths.path(Dataset::RoadEdges))?;

    for preference in [RoutingPreference::Shortest, RoutingPreference::Greenest] {
        let mut config = RunConfig::new("synthetic", BoundingBox::new(44.05, -121.3285, 44.06, -121.3145));
        config.data_dir = workdir.path().to_path_buf();
        config.routing_source = Some(1);
        config.routing_target = Some(4);
        config.routing_weight = preference;

        if let Some(route) = run_pipeline(&config, false)? {
            println!("Route by {}:", preference);
            println!("  - Nodes: {:?}", route.nodes);
            println!("  - Total weight: {:.4}", route.stats.total_weight);
            println!("  - Total length: {:.1} m", route.stats.total_length);
        }
    }

    println!("\nOutputs written to {:?}", paths.data_dir());
    Ok(())
}
