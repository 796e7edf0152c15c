use geo::{Geometry, Validation};
use geojson::JsonObject;
use serde_json::Value;

use crate::error::{GeometryProblem, GreenRouteError, Result, TableRole};
use crate::geo_core::GeoCore;

/// Number of offending rows quoted in geometry errors
const MAX_REPORTED_ROWS: usize = 10;

/// One record of a [`GeoTable`]: an optional geometry plus its attributes
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFeature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: JsonObject,
}

impl GeoFeature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        GeoFeature {
            geometry: Some(geometry),
            properties: JsonObject::new(),
        }
    }

    /// Feature without geometry
    pub fn null() -> Self {
        GeoFeature {
            geometry: None,
            properties: JsonObject::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Numeric attribute; `None` when absent, null or not a number
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(Value::as_f64)
    }

    /// Integer attribute; floats with an integral value are accepted
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.properties.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Ordered feature set sharing a CRS and a column schema.
///
/// The schema is tracked explicitly so that an empty table still knows its
/// columns (a clip with no overlap must stay joinable on `id`).
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable {
    name: String,
    geo_core: GeoCore,
    columns: Vec<String>,
    features: Vec<GeoFeature>,
}

impl GeoTable {
    pub fn new(name: impl Into<String>, geo_core: GeoCore) -> Self {
        GeoTable {
            name: name.into(),
            geo_core,
            columns: Vec::new(),
            features: Vec::new(),
        }
    }

    /// Build a table from features, deriving the schema from their properties
    pub fn from_features(
        name: impl Into<String>,
        geo_core: GeoCore,
        features: Vec<GeoFeature>,
    ) -> Self {
        let mut table = GeoTable::new(name, geo_core);
        for feature in features {
            table.push(feature);
        }
        table
    }

    /// Same schema and CRS, no rows
    pub fn empty_like(&self) -> Self {
        GeoTable {
            name: self.name.clone(),
            geo_core: self.geo_core,
            columns: self.columns.clone(),
            features: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn geo_core(&self) -> GeoCore {
        self.geo_core
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn features(&self) -> &[GeoFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeoFeature> {
        self.features.iter()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Register a column without touching the rows
    pub fn add_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn push(&mut self, feature: GeoFeature) {
        for key in feature.properties.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.features.push(feature);
    }

    /// Set `column` on every row, in row order
    pub fn set_column<I>(&mut self, column: &str, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        self.add_column(column);
        for (feature, value) in self.features.iter_mut().zip(values) {
            feature.properties.insert(column.to_string(), value);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(c) = self.columns.iter_mut().find(|c| *c == from) {
            *c = to.to_string();
        }
        for feature in &mut self.features {
            if let Some(value) = feature.properties.remove(from) {
                feature.properties.insert(to.to_string(), value);
            }
        }
    }

    /// Fail with `MissingField` unless `column` is part of the schema
    pub fn require_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(GreenRouteError::missing_field(&self.name, column))
        }
    }

    /// Check that every geometry is present and valid.
    /// Null geometries are reported before invalid ones.
    pub fn validate_geometries(&self, role: TableRole) -> Result<()> {
        let null_rows: Vec<usize> = self
            .features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.geometry.is_none())
            .map(|(i, _)| i)
            .collect();
        if !null_rows.is_empty() {
            return Err(self.geometry_error(role, GeometryProblem::Null, null_rows));
        }

        let invalid_rows: Vec<usize> = self
            .features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.geometry.as_ref().map_or(false, |g| !g.is_valid()))
            .map(|(i, _)| i)
            .collect();
        if !invalid_rows.is_empty() {
            return Err(self.geometry_error(role, GeometryProblem::Invalid, invalid_rows));
        }

        Ok(())
    }

    pub(crate) fn geometry_error(
        &self,
        role: TableRole,
        problem: GeometryProblem,
        mut rows: Vec<usize>,
    ) -> GreenRouteError {
        rows.truncate(MAX_REPORTED_ROWS);
        GreenRouteError::InvalidGeometry {
            role,
            table: self.name.clone(),
            problem,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square() -> Geometry<f64> {
        Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)])
    }

    #[test]
    fn test_schema_follows_pushed_features() {
        let mut table = GeoTable::new("edges", GeoCore::new(5070));
        table.push(GeoFeature::new(square()).with_property("u", 1));
        table.push(GeoFeature::new(square()).with_property("v", 2));
        assert_eq!(table.columns(), &["u".to_string(), "v".to_string()]);
        assert!(table.empty_like().has_column("v"));
    }

    #[test]
    fn test_rename_column() {
        let mut table = GeoTable::new("edges", GeoCore::unknown());
        table.push(GeoFeature::new(square()).with_property("area", 2.0));
        table.rename_column("area", "area_x");
        assert!(!table.has_column("area"));
        assert_eq!(table.features()[0].get_f64("area_x"), Some(2.0));
    }

    #[test]
    fn test_get_i64_accepts_integral_floats() {
        let feature = GeoFeature::null()
            .with_property("a", 7)
            .with_property("b", 7.0)
            .with_property("c", 7.5);
        assert_eq!(feature.get_i64("a"), Some(7));
        assert_eq!(feature.get_i64("b"), Some(7));
        assert_eq!(feature.get_i64("c"), None);
    }

    #[test]
    fn test_validate_geometries_reports_null_rows() {
        let table = GeoTable::from_features(
            "trees",
            GeoCore::unknown(),
            vec![GeoFeature::new(square()), GeoFeature::null()],
        );
        match table.validate_geometries(TableRole::Input) {
            Err(GreenRouteError::InvalidGeometry { problem, rows, .. }) => {
                assert_eq!(problem, GeometryProblem::Null);
                assert_eq!(rows, vec![1]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_geometries_reports_bowtie() {
        let bowtie = Geometry::Polygon(
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 1.0, y: 0.0), (x: 0.0, y: 1.0)],
        );
        let table = GeoTable::from_features("trees", GeoCore::unknown(), vec![GeoFeature::new(bowtie)]);
        assert!(matches!(
            table.validate_geometries(TableRole::Mask),
            Err(GreenRouteError::InvalidGeometry {
                role: TableRole::Mask,
                problem: GeometryProblem::Invalid,
                ..
            })
        ));
    }
}
