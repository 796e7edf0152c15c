use std::fmt;
use thiserror::Error;

/// Which side of a two-table operation a geometry problem was found on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Input,
    Mask,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRole::Input => write!(f, "Input"),
            TableRole::Mask => write!(f, "Mask"),
        }
    }
}

/// The validity check a geometry failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryProblem {
    /// Feature has no geometry at all
    Null,
    /// Geometry fails OGC validity (self-intersection, unclosed ring, ...)
    Invalid,
    /// Geometry kind the operation cannot handle
    Unsupported(&'static str),
}

impl fmt::Display for GeometryProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryProblem::Null => write!(f, "null"),
            GeometryProblem::Invalid => write!(f, "invalid"),
            GeometryProblem::Unsupported(kind) => write!(f, "unsupported ({})", kind),
        }
    }
}

/// Errors raised by the vector processing, green index and routing stages.
///
/// I/O and file format failures are not part of this taxonomy; they travel
/// through `anyhow` with the offending path attached.
#[derive(Debug, Error)]
pub enum GreenRouteError {
    #[error("Invalid {parameter}: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    #[error("{role} contains {problem} geometries (table '{table}', rows {rows:?})")]
    InvalidGeometry {
        role: TableRole,
        table: String,
        problem: GeometryProblem,
        rows: Vec<usize>,
    },

    #[error("Input and mask CRS must match (input '{input}': {input_crs}, mask '{mask}': {mask_crs})")]
    CrsMismatch {
        input: String,
        input_crs: String,
        mask: String,
        mask_crs: String,
    },

    #[error("{0}")]
    EmptyResult(String),

    #[error("Table '{table}' is missing required field '{field}'")]
    MissingField { table: String, field: String },

    #[error("No path from node {from} to node {to}")]
    NoPath { from: i64, to: i64 },

    #[error("Node {0} is not part of the routing graph")]
    UnknownNode(i64),

    #[error("No edge record connects consecutive path nodes ({u}, {v})")]
    EdgeNotFound { u: i64, v: i64 },

    #[error("Duplicate edge ({u}, {v}) at rows {first_row} and {second_row}")]
    DuplicateEdge {
        u: i64,
        v: i64,
        first_row: usize,
        second_row: usize,
    },

    #[error("Route geometry is not contiguous at edge {position} ({u}, {v})")]
    DisconnectedRoute { position: usize, u: i64, v: i64 },
}

pub type Result<T> = std::result::Result<T, GreenRouteError>;

impl GreenRouteError {
    pub(crate) fn invalid_parameter(parameter: &'static str, reason: impl Into<String>) -> Self {
        GreenRouteError::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_field(table: &str, field: &str) -> Self {
        GreenRouteError::MissingField {
            table: table.to_string(),
            field: field.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_geometry_message_names_role() {
        let err = GreenRouteError::InvalidGeometry {
            role: TableRole::Mask,
            table: "tree_buffers".to_string(),
            problem: GeometryProblem::Null,
            rows: vec![3],
        };
        assert!(err.to_string().starts_with("Mask contains null geometries"));
    }

    #[test]
    fn test_missing_field_message() {
        let err = GreenRouteError::missing_field("edges", "id");
        assert_eq!(err.to_string(), "Table 'edges' is missing required field 'id'");
    }
}
