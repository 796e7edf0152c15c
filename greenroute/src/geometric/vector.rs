use geo::{
    Area, BooleanOps, BoundingRect, Buffer, Geometry, MultiLineString, MultiPolygon, Rect,
    SimplifyVwPreserve,
};
use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{GeometryProblem, GreenRouteError, Result, TableRole};
use crate::geometric::table::{GeoFeature, GeoTable};

/// Bounding box of one mask feature, indexed for clipping
#[derive(Debug, Clone)]
struct MaskEnvelope {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for MaskEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Polygonal view of a geometry, `None` for points and lines
fn as_multi_polygon(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let polygons: Vec<_> = gc
                .iter()
                .filter_map(as_multi_polygon)
                .flat_map(|mp| mp.0)
                .collect();
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon::new(polygons))
            }
        }
        _ => None,
    }
}

fn as_multi_line_string(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::LineString(ls) => Some(MultiLineString::new(vec![ls.clone()])),
        Geometry::MultiLineString(mls) => Some(mls.clone()),
        Geometry::Line(l) => Some(MultiLineString::new(vec![(*l).into()])),
        _ => None,
    }
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// A single polygon stays a Polygon, anything else is a MultiPolygon
fn polygonal_geometry(mut mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        Geometry::Polygon(mp.0.remove(0))
    } else {
        Geometry::MultiPolygon(mp)
    }
}

/// Union of a set of multipolygons
fn union_all(shapes: impl IntoIterator<Item = MultiPolygon<f64>>) -> Option<MultiPolygon<f64>> {
    shapes.into_iter().reduce(|a, b| a.union(&b))
}

/// Expand every geometry by `distance` CRS units.
///
/// Attributes are kept; an empty table yields an empty table.
pub fn buffer(table: &GeoTable, distance: f64) -> Result<GeoTable> {
    if !(distance.is_finite() && distance > 0.0) {
        return Err(GreenRouteError::invalid_parameter(
            "buffer distance",
            format!("distance must be strictly positive and finite, got {}", distance),
        ));
    }
    table.validate_geometries(TableRole::Input)?;

    let mut output = table.empty_like();
    for feature in table.iter() {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        output.push(GeoFeature {
            geometry: Some(polygonal_geometry(geometry.buffer(distance))),
            properties: feature.properties.clone(),
        });
    }

    debug!(
        "Buffered {} features of '{}' by {}",
        output.len(),
        table.name(),
        distance
    );
    Ok(output)
}

/// Set `id` to 1..N in row order, replacing any previous value
pub fn assign_sequential_ids(table: &GeoTable) -> GeoTable {
    let mut output = table.clone();
    let ids: Vec<Value> = (1..=table.len() as i64).map(Value::from).collect();
    output.set_column("id", ids);
    output
}

/// Intersect every input feature with the union of the mask features.
///
/// Input attributes are kept and rows whose intersection is empty are
/// dropped. Both tables must share a CRS and hold valid, non-null geometries.
pub fn clip(input: &GeoTable, mask: &GeoTable) -> Result<GeoTable> {
    if input.geo_core() != mask.geo_core() {
        return Err(GreenRouteError::CrsMismatch {
            input: input.name().to_string(),
            input_crs: input.geo_core().label(),
            mask: mask.name().to_string(),
            mask_crs: mask.geo_core().label(),
        });
    }
    input.validate_geometries(TableRole::Input)?;
    mask.validate_geometries(TableRole::Mask)?;

    let mut output = input.empty_like();
    if input.is_empty() || mask.is_empty() {
        debug!("Clip of '{}' by '{}' is empty", input.name(), mask.name());
        return Ok(output);
    }

    let mut shapes = Vec::with_capacity(mask.len());
    let mut unsupported = Vec::new();
    for (row, feature) in mask.iter().enumerate() {
        match feature.geometry.as_ref().and_then(as_multi_polygon) {
            Some(mp) => shapes.push(mp),
            None => unsupported.push(row),
        }
    }
    if !unsupported.is_empty() {
        return Err(mask.geometry_error(
            TableRole::Mask,
            GeometryProblem::Unsupported("non-polygonal mask"),
            unsupported,
        ));
    }

    let rtree = RTree::bulk_load(
        shapes
            .iter()
            .enumerate()
            .filter_map(|(idx, mp)| mp.bounding_rect().map(|bbox| MaskEnvelope { idx, bbox }))
            .collect(),
    );

    for (row, feature) in input.iter().enumerate() {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let Some(rect) = geometry.bounding_rect() else {
            continue;
        };
        let search = AABB::from_corners(rect.min().into(), rect.max().into());
        let mut candidates: Vec<usize> = rtree
            .locate_in_envelope_intersecting(&search)
            .map(|cand| cand.idx)
            .collect();
        candidates.sort_unstable();
        let Some(local_mask) = union_all(candidates.into_iter().map(|i| shapes[i].clone())) else {
            continue;
        };

        let clipped = if let Some(mp) = as_multi_polygon(geometry) {
            let overlap = mp.intersection(&local_mask);
            if overlap.0.is_empty() {
                continue;
            }
            polygonal_geometry(overlap)
        } else if let Some(mls) = as_multi_line_string(geometry) {
            let inside = local_mask.clip(&mls, false);
            if inside.0.is_empty() {
                continue;
            }
            Geometry::MultiLineString(inside)
        } else {
            return Err(input.geometry_error(
                TableRole::Input,
                GeometryProblem::Unsupported(kind_name(geometry)),
                vec![row],
            ));
        };

        output.push(GeoFeature {
            geometry: Some(clipped),
            properties: feature.properties.clone(),
        });
    }

    info!(
        "Clipped '{}' by '{}': {} of {} features overlap",
        input.name(),
        mask.name(),
        output.len(),
        input.len()
    );
    Ok(output)
}

/// Add a planar `area` column (CRS units²); lines and points get 0
pub fn compute_area(table: &GeoTable) -> Result<GeoTable> {
    table.validate_geometries(TableRole::Input)?;
    let mut output = table.clone();
    let areas: Vec<Value> = table
        .iter()
        .map(|f| Value::from(f.geometry.as_ref().map_or(0.0, |g| g.unsigned_area())))
        .collect();
    output.set_column("area", areas);
    Ok(output)
}

/// Left join of `source.area` onto `target` by `id`.
///
/// Unmatched rows get a null area. If `target` already has an `area` column
/// it is renamed `area_x` and the joined values land in `area_y`.
pub fn join_area_by_id(target: &GeoTable, source: &GeoTable) -> Result<GeoTable> {
    target.require_column("id")?;
    if target.has_column("area") {
        let mut renamed = target.clone();
        renamed.rename_column("area", "area_x");
        join_area_into(&renamed, source, "area_y")
    } else {
        join_area_into(target, source, "area")
    }
}

/// Left join of `source.area` onto `target` by `id`, written to `column`.
///
/// Values already in `column` are replaced; unmatched rows get null.
pub fn join_area_into(target: &GeoTable, source: &GeoTable, column: &str) -> Result<GeoTable> {
    target.require_column("id")?;
    source.require_column("id")?;
    source.require_column("area")?;

    let mut lookup: HashMap<i64, (usize, Value)> = HashMap::with_capacity(source.len());
    for (row, feature) in source.iter().enumerate() {
        let Some(id) = feature.get_i64("id") else {
            continue;
        };
        let area = feature.properties.get("area").cloned().unwrap_or(Value::Null);
        if let Some((first_row, _)) = lookup.insert(id, (row, area)) {
            return Err(GreenRouteError::invalid_parameter(
                "join key",
                format!(
                    "id {} appears twice in '{}' (rows {} and {})",
                    id,
                    source.name(),
                    first_row,
                    row
                ),
            ));
        }
    }

    if target.has_column(column) {
        warn!(
            "Column '{}' of '{}' is replaced by the area of '{}'",
            column,
            target.name(),
            source.name()
        );
    }

    let joined: Vec<Value> = target
        .iter()
        .map(|f| {
            f.get_i64("id")
                .and_then(|id| lookup.get(&id))
                .map(|(_, area)| area.clone())
                .unwrap_or(Value::Null)
        })
        .collect();
    let matched = joined.iter().filter(|v| !v.is_null()).count();
    let mut output = target.clone();
    output.set_column(column, joined);

    debug!(
        "Joined area of '{}' onto '{}.{}': {} of {} rows matched",
        source.name(),
        target.name(),
        column,
        matched,
        target.len()
    );
    Ok(output)
}

/// Merge all polygonal features into one, keeping the first row's attributes
pub fn dissolve(table: &GeoTable) -> Result<GeoTable> {
    table.validate_geometries(TableRole::Input)?;
    let mut output = table.empty_like();

    let mut shapes = Vec::with_capacity(table.len());
    for (row, feature) in table.iter().enumerate() {
        match feature.geometry.as_ref().and_then(as_multi_polygon) {
            Some(mp) => shapes.push(mp),
            None => {
                return Err(table.geometry_error(
                    TableRole::Input,
                    GeometryProblem::Unsupported("non-polygonal"),
                    vec![row],
                ))
            }
        }
    }

    if let (Some(merged), Some(first)) = (union_all(shapes), table.features().first()) {
        output.push(GeoFeature {
            geometry: Some(polygonal_geometry(merged)),
            properties: first.properties.clone(),
        });
    }
    Ok(output)
}

/// Topology-preserving Visvalingam-Whyatt simplification of polygonal features.
///
/// `tolerance` is the smallest triangle area (CRS units²) a vertex must span
/// to be kept; 0 leaves the geometries unchanged.
pub fn simplify(table: &GeoTable, tolerance: f64) -> Result<GeoTable> {
    if !(tolerance.is_finite() && tolerance >= 0.0) {
        return Err(GreenRouteError::invalid_parameter(
            "simplify tolerance",
            format!("tolerance must be finite and >= 0, got {}", tolerance),
        ));
    }
    table.validate_geometries(TableRole::Input)?;

    let mut output = table.empty_like();
    for (row, feature) in table.iter().enumerate() {
        let Some(mp) = feature.geometry.as_ref().and_then(as_multi_polygon) else {
            return Err(table.geometry_error(
                TableRole::Input,
                GeometryProblem::Unsupported("non-polygonal"),
                vec![row],
            ));
        };
        output.push(GeoFeature {
            geometry: Some(polygonal_geometry(mp.simplify_vw_preserve(tolerance))),
            properties: feature.properties.clone(),
        });
    }

    debug!(
        "Simplified {} features of '{}' with tolerance {}",
        output.len(),
        table.name(),
        tolerance
    );
    Ok(output)
}

/// Keep only features whose area is strictly greater than `min_area`
pub fn filter_by_min_area(table: &GeoTable, min_area: f64) -> Result<GeoTable> {
    if !(min_area.is_finite() && min_area >= 0.0) {
        return Err(GreenRouteError::invalid_parameter(
            "minimum area",
            format!("min_area must be finite and >= 0, got {}", min_area),
        ));
    }
    table.validate_geometries(TableRole::Input)?;

    let mut output = table.empty_like();
    for feature in table.iter() {
        let area = feature.geometry.as_ref().map_or(0.0, |g| g.unsigned_area());
        if area > min_area {
            output.push(feature.clone());
        }
    }

    debug!(
        "Kept {} of {} features of '{}' above {} units²",
        output.len(),
        table.len(),
        table.name(),
        min_area
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::GeoCore;
    use geo::{line_string, point, polygon};

    fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size)
        ])
    }

    fn table(name: &str, geometries: Vec<Geometry<f64>>) -> GeoTable {
        GeoTable::from_features(
            name,
            GeoCore::new(5070),
            geometries.into_iter().map(GeoFeature::new).collect(),
        )
    }

    #[test]
    fn test_buffer_increases_area() {
        let input = table(
            "trees",
            vec![
                square(0.0, 0.0, 1.0),
                Geometry::Point(point!(x: 10.0, y: 10.0)),
                Geometry::LineString(line_string![(x: 0.0, y: 5.0), (x: 4.0, y: 5.0)]),
            ],
        );
        let buffered = buffer(&input, 1.0).unwrap();

        assert_eq!(buffered.len(), 3);
        for (before, after) in input.iter().zip(buffered.iter()) {
            let a0 = before.geometry.as_ref().unwrap().unsigned_area();
            let a1 = after.geometry.as_ref().unwrap().unsigned_area();
            assert!(a1 > a0);
        }
    }

    #[test]
    fn test_buffer_rejects_non_positive_distance() {
        let input = table("trees", vec![square(0.0, 0.0, 1.0)]);
        for distance in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                buffer(&input, distance),
                Err(GreenRouteError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_buffer_rejects_null_geometry() {
        let input = GeoTable::from_features("trees", GeoCore::new(5070), vec![GeoFeature::null()]);
        assert!(matches!(
            buffer(&input, 1.0),
            Err(GreenRouteError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_buffer_empty_table() {
        let input = GeoTable::new("trees", GeoCore::new(5070));
        assert!(buffer(&input, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_assign_sequential_ids_overwrites() {
        let mut input = table("edges", vec![square(0.0, 0.0, 1.0); 3]);
        input.set_column("id", vec![Value::from(42), Value::from(7), Value::from(42)]);
        let output = assign_sequential_ids(&input);
        let ids: Vec<i64> = output.iter().filter_map(|f| f.get_i64("id")).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_clip_keeps_overlap_and_attributes() {
        let input = assign_sequential_ids(&table(
            "roads",
            vec![square(0.0, 0.0, 2.0), square(10.0, 10.0, 1.0)],
        ));
        let mask = table("trees", vec![square(1.0, 1.0, 2.0), square(1.5, 0.0, 0.5)]);
        let clipped = clip(&input, &mask).unwrap();

        assert_eq!(clipped.len(), 1);
        let feature = &clipped.features()[0];
        assert_eq!(feature.get_i64("id"), Some(1));
        // [1,2]x[1,2] plus [1.5,2]x[0,0.5]
        let area = feature.geometry.as_ref().unwrap().unsigned_area();
        assert!((area - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_clip_crs_mismatch() {
        let input = table("roads", vec![square(0.0, 0.0, 1.0)]);
        let mask = GeoTable::from_features(
            "trees",
            GeoCore::new(4326),
            vec![GeoFeature::new(square(0.0, 0.0, 1.0))],
        );
        match clip(&input, &mask) {
            Err(err @ GreenRouteError::CrsMismatch { .. }) => {
                assert!(err.to_string().starts_with("Input and mask CRS must match"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_clip_empty_mask_keeps_schema() {
        let input = assign_sequential_ids(&table("roads", vec![square(0.0, 0.0, 1.0)]));
        let mask = GeoTable::new("trees", GeoCore::new(5070));
        let clipped = clip(&input, &mask).unwrap();
        assert!(clipped.is_empty());
        assert!(clipped.has_column("id"));
    }

    #[test]
    fn test_clip_names_faulty_side() {
        let input = table("roads", vec![square(0.0, 0.0, 1.0)]);
        let mask = GeoTable::from_features("trees", GeoCore::new(5070), vec![GeoFeature::null()]);
        match clip(&input, &mask) {
            Err(err @ GreenRouteError::InvalidGeometry { .. }) => {
                assert!(err.to_string().starts_with("Mask contains"))
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let input = GeoTable::from_features("roads", GeoCore::new(5070), vec![GeoFeature::null()]);
        let mask = table("trees", vec![square(0.0, 0.0, 1.0)]);
        match clip(&input, &mask) {
            Err(err @ GreenRouteError::InvalidGeometry { .. }) => {
                assert!(err.to_string().starts_with("Input contains"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_compute_area() {
        let input = table(
            "roads",
            vec![
                square(0.0, 0.0, 2.0),
                Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]),
            ],
        );
        let output = compute_area(&input).unwrap();
        assert_eq!(output.features()[0].get_f64("area"), Some(4.0));
        assert_eq!(output.features()[1].get_f64("area"), Some(0.0));
    }

    #[test]
    fn test_join_area_renames_existing_column() {
        let target = compute_area(&assign_sequential_ids(&table(
            "buffers",
            vec![square(0.0, 0.0, 2.0), square(5.0, 5.0, 1.0)],
        )))
        .unwrap();
        let mut source = table("overlap", vec![square(0.0, 0.0, 1.0)]);
        source.set_column("id", vec![Value::from(1)]);
        let source = compute_area(&source).unwrap();

        let joined = join_area_by_id(&target, &source).unwrap();
        assert!(joined.has_column("area_x"));
        assert!(joined.has_column("area_y"));
        assert!(!joined.has_column("area"));
        assert_eq!(joined.features()[0].get_f64("area_x"), Some(4.0));
        assert_eq!(joined.features()[0].get_f64("area_y"), Some(1.0));
        assert_eq!(joined.features()[1].get_f64("area_y"), None);
        assert_eq!(joined.len(), target.len());
    }

    #[test]
    fn test_join_area_into_replaces_column() {
        let mut target = assign_sequential_ids(&table("buffers", vec![square(0.0, 0.0, 2.0); 2]));
        target.set_column("area", vec![Value::from("yes"), Value::from("no")]);
        target.set_column("area_x", vec![Value::from("stale"), Value::Null]);
        let mut source = table("buffers", vec![square(0.0, 0.0, 3.0)]);
        source.set_column("id", vec![Value::from(2)]);
        let source = compute_area(&source).unwrap();

        let joined = join_area_into(&target, &source, "area_x").unwrap();
        assert_eq!(joined.features()[0].get_f64("area_x"), None);
        assert_eq!(joined.features()[1].get_f64("area_x"), Some(9.0));
        assert_eq!(
            joined.features()[0].properties.get("area"),
            Some(&Value::from("yes"))
        );
        assert!(!joined.has_column("area_y"));
    }

    #[test]
    fn test_join_area_missing_fields() {
        let target = table("buffers", vec![square(0.0, 0.0, 1.0)]);
        let source = compute_area(&assign_sequential_ids(&target)).unwrap();
        match join_area_by_id(&target, &source) {
            Err(GreenRouteError::MissingField { table, field }) => {
                assert_eq!(table, "buffers");
                assert_eq!(field, "id");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let target = assign_sequential_ids(&target);
        let source = assign_sequential_ids(&table("overlap", vec![square(0.0, 0.0, 1.0)]));
        assert!(matches!(
            join_area_by_id(&target, &source),
            Err(GreenRouteError::MissingField { .. })
        ));
    }

    #[test]
    fn test_join_area_rejects_duplicate_source_ids() {
        let target = assign_sequential_ids(&table("buffers", vec![square(0.0, 0.0, 1.0)]));
        let mut source = compute_area(&table("overlap", vec![square(0.0, 0.0, 1.0); 2])).unwrap();
        source.set_column("id", vec![Value::from(1), Value::from(1)]);
        assert!(matches!(
            join_area_by_id(&target, &source),
            Err(GreenRouteError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_dissolve_merges_overlapping_polygons() {
        let input = table("trees", vec![square(0.0, 0.0, 2.0), square(1.0, 0.0, 2.0)])
            .with_name("trees");
        let input = assign_sequential_ids(&input);
        let output = dissolve(&input).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output.features()[0].get_i64("id"), Some(1));
        let area = output.features()[0].geometry.as_ref().unwrap().unsigned_area();
        assert!((area - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_simplify_drops_near_collinear_vertex() {
        let notched = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.01),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0)
        ]);
        let input = assign_sequential_ids(&table("trees", vec![notched]));

        let output = simplify(&input, 0.1).unwrap();
        let feature = &output.features()[0];
        assert_eq!(feature.get_i64("id"), Some(1));
        let Some(Geometry::Polygon(polygon)) = &feature.geometry else {
            panic!("expected a polygon, got {:?}", feature.geometry);
        };
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!((polygon.unsigned_area() - 4.0).abs() < 1e-9);

        let unchanged = simplify(&input, 0.0).unwrap();
        assert_eq!(unchanged.features()[0].geometry, input.features()[0].geometry);
        assert!(simplify(&input, -1.0).is_err());
    }

    #[test]
    fn test_filter_by_min_area() {
        let input = table("trees", vec![square(0.0, 0.0, 1.0), square(5.0, 5.0, 3.0)]);
        let output = filter_by_min_area(&input, 2.0).unwrap();
        assert_eq!(output.len(), 1);
        assert!(filter_by_min_area(&input, -1.0).is_err());
    }
}
