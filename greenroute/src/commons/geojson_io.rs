use anyhow::{bail, Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use log::debug;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::geo_core::GeoCore;
use crate::geometric::table::{GeoFeature, GeoTable};

const CRS_MEMBER: &str = "crs";
const COLUMNS_MEMBER: &str = "columns";

fn crs_from_members(members: Option<&JsonObject>) -> GeoCore {
    members
        .and_then(|m| m.get(CRS_MEMBER))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(Value::as_str)
        .and_then(GeoCore::parse)
        .unwrap_or_default()
}

fn columns_from_members(members: Option<&JsonObject>) -> Vec<String> {
    members
        .and_then(|m| m.get(COLUMNS_MEMBER))
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn feature_to_record(feature: Feature) -> Result<GeoFeature> {
    let geometry = match feature.geometry {
        Some(g) => Some(
            geo::Geometry::<f64>::try_from(g)
                .context("Failed to convert GeoJSON geometry to geo::Geometry")?,
        ),
        None => None,
    };
    Ok(GeoFeature {
        geometry,
        properties: feature.properties.unwrap_or_default(),
    })
}

/// Parse a GeoJSON document into a table named `name`.
///
/// The CRS comes from the `crs` member and the schema from `columns` when
/// present, so empty tables keep their columns.
pub fn parse_table(text: &str, name: &str) -> Result<GeoTable> {
    let geojson: GeoJson = text.parse().context("Failed to parse GeoJSON")?;
    let (members, features) = match geojson {
        GeoJson::FeatureCollection(fc) => (fc.foreign_members, fc.features),
        GeoJson::Feature(f) => (None, vec![f]),
        GeoJson::Geometry(_) => bail!("Expected a FeatureCollection, found a bare geometry"),
    };

    let mut table = GeoTable::new(name, crs_from_members(members.as_ref()));
    for column in columns_from_members(members.as_ref()) {
        table.add_column(&column);
    }
    for feature in features {
        table.push(feature_to_record(feature)?);
    }
    Ok(table)
}

/// Serialize a table as a FeatureCollection with `crs` and `columns` members
pub fn table_to_geojson(table: &GeoTable) -> GeoJson {
    let features = table
        .iter()
        .map(|record| Feature {
            bbox: None,
            geometry: record
                .geometry
                .as_ref()
                .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
            id: None,
            properties: Some(record.properties.clone()),
            foreign_members: None,
        })
        .collect();

    let mut members = JsonObject::new();
    if let Some(urn) = table.geo_core().urn() {
        members.insert(
            CRS_MEMBER.to_string(),
            json!({ "type": "name", "properties": { "name": urn } }),
        );
    }
    members.insert(COLUMNS_MEMBER.to_string(), json!(table.columns()));

    GeoJson::from(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    })
}

/// Load a GeoJSON table from disk
pub fn read_table(path: &Path, name: &str) -> Result<GeoTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read GeoJSON file: {:?}", path))?;
    let table = parse_table(&text, name).with_context(|| format!("Invalid GeoJSON file: {:?}", path))?;
    debug!(
        "Read {} features from {:?} ({})",
        table.len(),
        path,
        table.geo_core().label()
    );
    Ok(table)
}

/// Write a table atomically: the document goes to a temporary file in the
/// same directory, which is then renamed over `path`
pub fn write_table(table: &GeoTable, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {:?}", dir))?;
    tmp.write_all(table_to_geojson(table).to_string().as_bytes())
        .with_context(|| format!("Failed to write GeoJSON file: {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to move GeoJSON file into place: {:?}", path))?;

    debug!("Wrote {} features to {:?}", table.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, Geometry};

    #[test]
    fn test_write_then_read_keeps_crs_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edges.geojson");

        let mut table = GeoTable::new("edges", GeoCore::new(5070));
        table.push(
            GeoFeature::new(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]))
                .with_property("u", 1)
                .with_property("v", 2)
                .with_property("area_y", Value::Null),
        );
        write_table(&table, &path).unwrap();

        let loaded = read_table(&path, "edges").unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.features()[0].get_f64("area_y"), None);
    }

    #[test]
    fn test_empty_table_keeps_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipped.geojson");

        let mut table = GeoTable::new("clipped", GeoCore::new(32610));
        table.add_column("id");
        write_table(&table, &path).unwrap();

        let loaded = read_table(&path, "clipped").unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.has_column("id"));
        assert_eq!(loaded.geo_core(), GeoCore::new(32610));
    }

    #[test]
    fn test_parse_plain_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": null, "properties": {"osmid": 5}}
            ]
        }"#;
        let table = parse_table(text, "nodes").unwrap();
        assert_eq!(table.geo_core(), GeoCore::unknown());
        assert_eq!(table.len(), 1);
        assert!(table.features()[0].geometry.is_none());
        assert_eq!(table.features()[0].get_i64("osmid"), Some(5));
    }

    #[test]
    fn test_read_missing_file_names_path() {
        let err = read_table(Path::new("/nonexistent/nodes.geojson"), "nodes").unwrap_err();
        assert!(format!("{:#}", err).contains("nodes.geojson"));
    }
}
