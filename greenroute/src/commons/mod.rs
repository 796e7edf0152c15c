pub mod config;
pub mod geojson_io;
pub mod paths;
