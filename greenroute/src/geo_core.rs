use geo::Coord;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{GreenRouteError, Result};

/// Semi-major axis of the WGS84 ellipsoid, used as the sphere radius of EPSG:3857
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Largest tile edge (in pixels) the imagery export accepts
pub const MAX_TILE_PIXELS: u32 = 2500;

/// Base struct for CRS handling
/// Tables and rasters carry an optional EPSG code; operations that combine two
/// datasets compare them through this type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeoCore {
    /// EPSG code, `None` when the source did not declare one
    pub epsg: Option<i32>,
}

impl GeoCore {
    pub fn new(epsg: i32) -> Self {
        GeoCore { epsg: Some(epsg) }
    }

    pub fn unknown() -> Self {
        GeoCore { epsg: None }
    }

    pub fn get_epsg(&self) -> Option<i32> {
        self.epsg
    }

    /// Human readable CRS label, e.g. `EPSG:5070`
    pub fn label(&self) -> String {
        match self.epsg {
            Some(code) => format!("EPSG:{}", code),
            None => "undefined".to_string(),
        }
    }

    /// OGC URN used for the `crs` member of GeoJSON documents
    pub fn urn(&self) -> Option<String> {
        self.epsg.map(|code| format!("urn:ogc:def:crs:EPSG::{}", code))
    }

    /// Parse `EPSG:5070`, `epsg:5070` or `urn:ogc:def:crs:EPSG::5070`
    pub fn parse(name: &str) -> Option<Self> {
        let code = name.rsplit(':').next()?.trim();
        let upper = name.to_ascii_uppercase();
        if !upper.contains("EPSG") {
            return None;
        }
        code.parse::<i32>().ok().map(GeoCore::new)
    }
}

/// WGS84 bounding box given by its south-west and north-east corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub sw_lat: f64,
    pub sw_lon: f64,
    pub ne_lat: f64,
    pub ne_lon: f64,
}

impl BoundingBox {
    pub fn new(sw_lat: f64, sw_lon: f64, ne_lat: f64, ne_lon: f64) -> Self {
        BoundingBox {
            sw_lat,
            sw_lon,
            ne_lat,
            ne_lon,
        }
    }

    /// Check coordinate ranges and corner ordering
    pub fn validate(&self) -> Result<()> {
        for lat in [self.sw_lat, self.ne_lat] {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(GreenRouteError::invalid_parameter(
                    "bounding box",
                    "Latitude must be between -90 and 90",
                ));
            }
        }
        for lon in [self.sw_lon, self.ne_lon] {
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                return Err(GreenRouteError::invalid_parameter(
                    "bounding box",
                    "Longitude must be between -180 and 180",
                ));
            }
        }
        if self.sw_lat == self.ne_lat && self.sw_lon == self.ne_lon {
            return Err(GreenRouteError::invalid_parameter(
                "bounding box",
                "Degenerate bounding box: SW and NE cannot be equal",
            ));
        }
        if self.sw_lat >= self.ne_lat || self.sw_lon >= self.ne_lon {
            return Err(GreenRouteError::invalid_parameter(
                "bounding box",
                "SW coordinates must be smaller than NE coordinates",
            ));
        }
        Ok(())
    }
}

/// Web Mercator (EPSG:3857) bounding box in meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBoxMercator {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Project a WGS84 longitude/latitude pair onto spherical Web Mercator
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Convert a WGS84 bounding box into Web Mercator coordinates
pub fn bounding_box_mercator(bbox: &BoundingBox) -> BoundingBoxMercator {
    let (xmin, ymin) = lonlat_to_mercator(bbox.sw_lon, bbox.sw_lat);
    let (xmax, ymax) = lonlat_to_mercator(bbox.ne_lon, bbox.ne_lat);
    BoundingBoxMercator {
        xmin,
        ymin,
        xmax,
        ymax,
    }
}

/// Compute the raster width and height (in pixels) covering a Mercator box at
/// `resolution` meters per pixel
pub fn tile_calculator(bbox: &BoundingBoxMercator, resolution: f64) -> Result<(u32, u32)> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(GreenRouteError::invalid_parameter(
            "resolution",
            format!("resolution must be positive, got {}", resolution),
        ));
    }

    let width = ((bbox.xmax - bbox.xmin) / resolution).round().max(0.0) as u64;
    let height = ((bbox.ymax - bbox.ymin) / resolution).round().max(0.0) as u64;

    if width < 1 || height < 1 {
        return Err(GreenRouteError::invalid_parameter(
            "tile size",
            format!(
                "Width and height (pixel count) must be >= 1. Width: {}, height: {}",
                width, height
            ),
        ));
    }
    if width > MAX_TILE_PIXELS as u64 || height > MAX_TILE_PIXELS as u64 {
        return Err(GreenRouteError::invalid_parameter(
            "tile size",
            format!(
                "Tile size too large: maximum allowed is {max}x{max} pixels. Width: {}, height: {}",
                width,
                height,
                max = MAX_TILE_PIXELS
            ),
        ));
    }

    info!("Width: {}", width);
    info!("Height: {}", height);

    Ok((width as u32, height as u32))
}

/// OSM download extent as (left, bottom, right, top) in WGS84
pub fn bounding_box_osm(bbox: &BoundingBox) -> (f64, f64, f64, f64) {
    (bbox.sw_lon, bbox.sw_lat, bbox.ne_lon, bbox.ne_lat)
}

/// Affine pixel-to-world transform in GDAL order:
/// `x = origin_x + col * pixel_width + row * row_rotation`,
/// `y = origin_y + col * col_rotation + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels, like `rasterio.transform.from_origin`
    pub fn from_origin(west: f64, north: f64, xsize: f64, ysize: f64) -> Self {
        GeoTransform {
            origin_x: west,
            pixel_width: xsize,
            row_rotation: 0.0,
            origin_y: north,
            col_rotation: 0.0,
            pixel_height: -ysize,
        }
    }

    /// World coordinate of a pixel-grid vertex (col, row)
    pub fn apply(&self, col: f64, row: f64) -> Coord<f64> {
        Coord {
            x: self.origin_x + col * self.pixel_width + row * self.row_rotation,
            y: self.origin_y + col * self.col_rotation + row * self.pixel_height,
        }
    }

    /// Area of one pixel in CRS units²
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation).abs()
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0)
    }
}
