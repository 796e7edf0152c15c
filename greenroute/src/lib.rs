pub mod commons;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod pipeline;
pub mod routing;

pub use commons::config::{DuplicateEdgePolicy, RoutingPreference, RunConfig};
pub use error::{GreenRouteError, Result};
pub use geometric::table::{GeoFeature, GeoTable};
pub use routing::route::{Route, RouteStats};
