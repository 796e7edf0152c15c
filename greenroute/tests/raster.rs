use geo::{Area, Validation};

use greenroute::geo_core::{GeoCore, GeoTransform};
use greenroute::geometric::raster::{extract_tree_polygons, RasterMask, TREE_VALUE};
use greenroute::geometric::vector::{buffer, clip, compute_area};

fn two_clusters() -> RasterMask {
    let width = 12;
    let mut data = vec![0u8; width * width];
    for (col0, row0) in [(1, 1), (7, 6)] {
        for row in row0..row0 + 3 {
            for col in col0..col0 + 3 {
                data[row * width + col] = TREE_VALUE;
            }
        }
    }
    RasterMask::new(
        width,
        width,
        data,
        GeoTransform::from_origin(0.0, 12.0, 1.0, 1.0),
        GeoCore::new(5070),
    )
    .unwrap()
}

#[test]
fn test_two_clusters_from_geotiff() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.tif");
    two_clusters().to_geotiff(&path).unwrap();

    let raster = RasterMask::from_geotiff(&path).unwrap();
    let polygons = extract_tree_polygons(&raster).unwrap();

    assert_eq!(polygons.len(), 2);
    assert_eq!(polygons.geo_core(), GeoCore::new(5070));
    for feature in polygons.iter() {
        let geometry = feature.geometry.as_ref().unwrap();
        assert!(geometry.is_valid());
        assert!((geometry.unsigned_area() - 9.0).abs() < 1e-9);
    }
}

#[test]
fn test_polygons_flow_through_vector_stages() {
    let polygons = extract_tree_polygons(&two_clusters()).unwrap();
    let buffered = buffer(&polygons, 1.0).unwrap();
    for (before, after) in polygons.iter().zip(buffered.iter()) {
        assert!(
            after.geometry.as_ref().unwrap().unsigned_area()
                > before.geometry.as_ref().unwrap().unsigned_area()
        );
    }

    // Clipping the buffers by the polygons gives back the polygons
    let clipped = compute_area(&clip(&buffered, &polygons).unwrap()).unwrap();
    assert_eq!(clipped.len(), 2);
    for feature in clipped.iter() {
        assert!((feature.get_f64("area").unwrap() - 9.0).abs() < 1e-6);
    }
}
