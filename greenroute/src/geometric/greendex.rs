use log::{debug, info};
use serde_json::Value;

use crate::error::{GreenRouteError, Result};
use crate::geometric::table::GeoTable;

/// Column holding the road-buffer area after the area join
pub const BUFFER_AREA_COLUMN: &str = "area_x";
/// Column holding the canopy overlap area after the area join
pub const OVERLAP_AREA_COLUMN: &str = "area_y";

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Share of the road buffer covered by canopy, rounded to 4 decimals.
///
/// Undefined ratios (missing overlap, zero or missing buffer area) give 0.
pub fn greendex(area_buffer: Option<f64>, area_overlap: Option<f64>) -> f64 {
    match (area_buffer, area_overlap) {
        (Some(a), Some(b)) => {
            let ratio = round_to(b / a, 4);
            if ratio.is_finite() {
                ratio
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Min-max normalisation of segment lengths over the whole table.
///
/// A constant column (including a single row) normalises to 1, so that the
/// weight of a length-invariant table is `1 - greendex` and shade alone
/// ranks the edges.
pub fn length_norm(lengths: &[f64]) -> Result<Vec<f64>> {
    if let Some(bad) = lengths.iter().find(|l| !l.is_finite()) {
        return Err(GreenRouteError::invalid_parameter(
            "length",
            format!("segment lengths must be finite, found {}", bad),
        ));
    }

    let min = lengths.iter().copied().fold(f64::INFINITY, f64::min);
    let max = lengths.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if lengths.is_empty() || range == 0.0 {
        return Ok(vec![1.0; lengths.len()]);
    }
    Ok(lengths.iter().map(|l| (l - min) / range).collect())
}

/// Routing cost of one edge: short and shaded is cheap
pub fn edge_weight(length_norm: f64, greendex: f64) -> f64 {
    round_to(length_norm * (1.0 - greendex), 4)
}

/// Add `greendex` and `weight` columns to an edge table carrying `length`,
/// `area_x` (buffer area) and `area_y` (canopy overlap).
pub fn compute_greendex(edges: &GeoTable) -> Result<GeoTable> {
    edges.require_column("length")?;
    edges.require_column(BUFFER_AREA_COLUMN)?;
    edges.require_column(OVERLAP_AREA_COLUMN)?;

    let mut lengths = Vec::with_capacity(edges.len());
    for (row, feature) in edges.iter().enumerate() {
        let length = feature.get_f64("length").ok_or_else(|| {
            GreenRouteError::invalid_parameter(
                "length",
                format!("row {} of '{}' has no numeric length", row, edges.name()),
            )
        })?;
        lengths.push(length);
    }
    let norms = length_norm(&lengths)?;

    let greens: Vec<f64> = edges
        .iter()
        .map(|f| greendex(f.get_f64(BUFFER_AREA_COLUMN), f.get_f64(OVERLAP_AREA_COLUMN)))
        .collect();
    let weights: Vec<f64> = norms
        .iter()
        .zip(&greens)
        .map(|(&n, &g)| edge_weight(n, g))
        .collect();

    let shaded = greens.iter().filter(|&&g| g > 0.0).count();
    debug!("{} of {} edges have canopy overlap", shaded, edges.len());

    let mut output = edges.clone();
    output.set_column("greendex", greens.into_iter().map(Value::from));
    output.set_column("weight", weights.into_iter().map(Value::from));

    info!("Computed greendex for {} edges", output.len());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::GeoCore;
    use crate::geometric::table::GeoFeature;

    fn edge(length: f64, area_x: Option<f64>, area_y: Option<f64>) -> GeoFeature {
        GeoFeature::null()
            .with_property("length", length)
            .with_property("area_x", area_x.map_or(Value::Null, Value::from))
            .with_property("area_y", area_y.map_or(Value::Null, Value::from))
    }

    #[test]
    fn test_greendex_ratio_and_degenerate_cases() {
        assert_eq!(greendex(Some(3.0), Some(1.0)), 0.3333);
        assert_eq!(greendex(Some(0.0), Some(1.0)), 0.0);
        assert_eq!(greendex(Some(0.0), Some(0.0)), 0.0);
        assert_eq!(greendex(Some(2.0), None), 0.0);
        assert_eq!(greendex(None, Some(2.0)), 0.0);
    }

    #[test]
    fn test_length_norm() {
        assert_eq!(length_norm(&[1.0, 2.0, 3.0]).unwrap(), vec![0.0, 0.5, 1.0]);
        assert_eq!(length_norm(&[5.0]).unwrap(), vec![1.0]);
        assert_eq!(length_norm(&[2.0, 2.0]).unwrap(), vec![1.0, 1.0]);
        assert!(length_norm(&[]).unwrap().is_empty());
        assert!(matches!(
            length_norm(&[1.0, f64::NAN]),
            Err(GreenRouteError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_weight_is_monotone() {
        assert!(edge_weight(0.8, 0.2) >= edge_weight(0.4, 0.2));
        assert!(edge_weight(0.8, 0.6) <= edge_weight(0.8, 0.2));
        assert_eq!(edge_weight(1.0, 1.0), 0.0);
    }

    #[test]
    fn test_compute_greendex_columns() {
        let edges = GeoTable::from_features(
            "edges",
            GeoCore::new(5070),
            vec![
                edge(10.0, Some(4.0), Some(1.0)),
                edge(20.0, Some(4.0), None),
                edge(30.0, Some(4.0), Some(4.0)),
            ],
        );
        let output = compute_greendex(&edges).unwrap();
        let rows = output.features();

        assert_eq!(rows[0].get_f64("greendex"), Some(0.25));
        assert_eq!(rows[1].get_f64("greendex"), Some(0.0));
        assert_eq!(rows[2].get_f64("greendex"), Some(1.0));
        assert_eq!(rows[0].get_f64("weight"), Some(0.0));
        assert_eq!(rows[1].get_f64("weight"), Some(0.5));
        assert_eq!(rows[2].get_f64("weight"), Some(0.0));
    }

    #[test]
    fn test_uniform_lengths_rank_by_shade() {
        let edges = GeoTable::from_features(
            "edges",
            GeoCore::new(5070),
            vec![
                edge(1.0, Some(4.0), Some(3.0)),
                edge(1.0, Some(4.0), None),
                edge(1.0, Some(4.0), Some(1.0)),
            ],
        );
        let output = compute_greendex(&edges).unwrap();
        let weights: Vec<f64> = output.iter().filter_map(|f| f.get_f64("weight")).collect();
        assert_eq!(weights, vec![0.25, 1.0, 0.75]);
    }

    #[test]
    fn test_compute_greendex_requires_columns() {
        let edges = GeoTable::from_features(
            "edges",
            GeoCore::new(5070),
            vec![GeoFeature::null().with_property("length", 1.0)],
        );
        match compute_greendex(&edges) {
            Err(GreenRouteError::MissingField { field, .. }) => assert_eq!(field, "area_x"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
