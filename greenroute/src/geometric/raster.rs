use anyhow::{bail, Context};
use geo::orient::{Direction, Orient};
use geo::{Coord, Geometry, LineString, Polygon};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{GreenRouteError, Result};
use crate::geo_core::{GeoCore, GeoTransform};
use crate::geometric::table::{GeoFeature, GeoTable};

/// Pixel value marking tree canopy in the classifier output
pub const TREE_VALUE: u8 = 255;

// GeoTIFF tags and keys
const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const MODEL_TRANSFORMATION_TAG: u16 = 34264;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

/// Single-band 8-bit georeferenced grid produced by the tree classifier
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMask {
    width: usize,
    height: usize,
    data: Vec<u8>,
    transform: GeoTransform,
    geo_core: GeoCore,
}

impl RasterMask {
    /// Create a mask from row-major pixel data
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<u8>,
        transform: GeoTransform,
        geo_core: GeoCore,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(GreenRouteError::invalid_parameter(
                "raster size",
                format!(
                    "expected {}x{} = {} pixels, got {}",
                    width,
                    height,
                    width * height,
                    data.len()
                ),
            ));
        }
        Ok(RasterMask {
            width,
            height,
            data,
            transform,
            geo_core,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn geo_core(&self) -> GeoCore {
        self.geo_core
    }

    pub fn value(&self, col: usize, row: usize) -> u8 {
        self.data[row * self.width + col]
    }

    /// Number of canopy pixels
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == TREE_VALUE).count()
    }

    /// Read a tree mask GeoTIFF.
    /// The georeferencing comes from ModelTransformation, or from ModelTiepoint +
    /// ModelPixelScale; the EPSG code from the GeoKey directory.
    pub fn from_geotiff(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open tree mask raster: {:?}", path))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to decode TIFF header: {:?}", path))?;

        let (width, height) = decoder.dimensions()?;
        match decoder.colortype()? {
            ColorType::Gray(8) => {}
            other => bail!(
                "Tree mask {:?} must be a single-band 8-bit raster, found {:?}",
                path,
                other
            ),
        }

        let transform = read_geo_transform(&mut decoder)?.unwrap_or_else(|| {
            warn!("Raster {:?} has no georeferencing, using pixel coordinates", path);
            GeoTransform::default()
        });
        let geo_core = read_geo_core(&mut decoder)?;

        let data = match decoder
            .read_image()
            .with_context(|| format!("Failed to read pixels of {:?}", path))?
        {
            DecodingResult::U8(buf) => buf,
            _ => bail!("Tree mask {:?} does not hold 8-bit samples", path),
        };

        info!(
            "Loaded tree mask {:?}: {}x{} pixels, CRS {}",
            path,
            width,
            height,
            geo_core.label()
        );

        Ok(RasterMask::new(
            width as usize,
            height as usize,
            data,
            transform,
            geo_core,
        )?)
    }

    /// Write the mask as a GeoTIFF readable by [`RasterMask::from_geotiff`]
    pub fn to_geotiff(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create raster file: {:?}", path))?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        let mut image =
            encoder.new_image::<colortype::Gray8>(self.width as u32, self.height as u32)?;

        let t = &self.transform;
        if t.row_rotation == 0.0 && t.col_rotation == 0.0 {
            let scale = [t.pixel_width, -t.pixel_height, 0.0];
            let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG), &scale[..])?;
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG), &tiepoint[..])?;
        } else {
            let matrix = [
                t.pixel_width,
                t.row_rotation,
                0.0,
                t.origin_x,
                t.col_rotation,
                t.pixel_height,
                0.0,
                t.origin_y,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                1.0,
            ];
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION_TAG), &matrix[..])?;
        }

        if let Some(epsg) = self.geo_core.get_epsg() {
            let key = if (4000..5000).contains(&epsg) {
                GEOGRAPHIC_TYPE_GEO_KEY
            } else {
                PROJECTED_CS_TYPE_GEO_KEY
            };
            let directory: [u16; 8] = [1, 1, 0, 1, key, 0, 1, epsg as u16];
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG), &directory[..])?;
        }

        image
            .write_data(&self.data)
            .with_context(|| format!("Failed to write pixels to {:?}", path))?;
        Ok(())
    }
}

fn find_f64_vec<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> anyhow::Result<Option<Vec<f64>>> {
    match decoder.find_tag(Tag::from_u16_exhaustive(code))? {
        Some(value) => Ok(Some(value.into_f64_vec()?)),
        None => Ok(None),
    }
}

fn read_geo_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> anyhow::Result<Option<GeoTransform>> {
    if let Some(m) = find_f64_vec(decoder, MODEL_TRANSFORMATION_TAG)? {
        if m.len() >= 8 {
            return Ok(Some(GeoTransform {
                origin_x: m[3],
                pixel_width: m[0],
                row_rotation: m[1],
                origin_y: m[7],
                col_rotation: m[4],
                pixel_height: m[5],
            }));
        }
    }

    let scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE_TAG)?;
    let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT_TAG)?;
    match (scale, tiepoint) {
        (Some(s), Some(tp)) if s.len() >= 2 && tp.len() >= 6 => {
            // Tiepoint maps raster (i, j) onto model (x, y)
            let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
            Ok(Some(GeoTransform {
                origin_x: x - i * s[0],
                pixel_width: s[0],
                row_rotation: 0.0,
                origin_y: y + j * s[1],
                col_rotation: 0.0,
                pixel_height: -s[1],
            }))
        }
        _ => Ok(None),
    }
}

fn read_geo_core<R: Read + Seek>(decoder: &mut Decoder<R>) -> anyhow::Result<GeoCore> {
    let directory = match decoder
        .find_tag_unsigned_vec::<u16>(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))?
    {
        Some(d) => d,
        None => return Ok(GeoCore::unknown()),
    };

    let mut geographic = None;
    let mut projected = None;
    // Header is 4 shorts, then (key, location, count, value) entries
    for entry in directory.get(4..).unwrap_or(&[]).chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == USER_DEFINED {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(value as i32),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value as i32),
            _ => {}
        }
    }

    Ok(GeoCore {
        epsg: projected.or(geographic),
    })
}

/// Boundary segment between a canopy cell and a non-canopy neighbour, in
/// pixel-grid vertex coordinates, oriented clockwise around its cell
#[derive(Debug, Clone, Copy)]
struct BoundaryEdge {
    start: (i64, i64),
    end: (i64, i64),
    cell: usize,
}

/// Label 4-connected canopy regions in row-major discovery order.
/// Returns per-pixel labels (0 = background) and the number of regions.
fn label_regions(raster: &RasterMask) -> (Vec<u32>, u32) {
    let (w, h) = (raster.width, raster.height);
    let mut labels = vec![0u32; w * h];
    let mut count = 0u32;
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if raster.data[start] != TREE_VALUE || labels[start] != 0 {
            continue;
        }
        count += 1;
        labels[start] = count;
        queue.push_back(start);

        while let Some(idx) = queue.pop_front() {
            let (col, row) = (idx % w, idx / w);
            let mut neighbours = [None; 4];
            if row > 0 {
                neighbours[0] = Some(idx - w);
            }
            if col + 1 < w {
                neighbours[1] = Some(idx + 1);
            }
            if row + 1 < h {
                neighbours[2] = Some(idx + w);
            }
            if col > 0 {
                neighbours[3] = Some(idx - 1);
            }
            for n in neighbours.into_iter().flatten() {
                if raster.data[n] == TREE_VALUE && labels[n] == 0 {
                    labels[n] = count;
                    queue.push_back(n);
                }
            }
        }
    }

    (labels, count)
}

/// Collect the exposed cell sides of every region, grouped by label
fn boundary_edges(raster: &RasterMask, labels: &[u32], regions: u32) -> Vec<Vec<BoundaryEdge>> {
    let (w, h) = (raster.width, raster.height);
    let mut edges = vec![Vec::new(); regions as usize];
    let same = |col: i64, row: i64, label: u32| -> bool {
        col >= 0
            && row >= 0
            && (col as usize) < w
            && (row as usize) < h
            && labels[row as usize * w + col as usize] == label
    };

    for idx in 0..w * h {
        let label = labels[idx];
        if label == 0 {
            continue;
        }
        let (c, r) = ((idx % w) as i64, (idx / w) as i64);
        let bucket = &mut edges[label as usize - 1];
        if !same(c, r - 1, label) {
            bucket.push(BoundaryEdge { start: (c, r), end: (c + 1, r), cell: idx });
        }
        if !same(c + 1, r, label) {
            bucket.push(BoundaryEdge { start: (c + 1, r), end: (c + 1, r + 1), cell: idx });
        }
        if !same(c, r + 1, label) {
            bucket.push(BoundaryEdge { start: (c + 1, r + 1), end: (c, r + 1), cell: idx });
        }
        if !same(c - 1, r, label) {
            bucket.push(BoundaryEdge { start: (c, r + 1), end: (c, r), cell: idx });
        }
    }

    edges
}

/// Chain boundary edges into closed rings.
///
/// Where two cells of the region touch only at a corner, two rings meet at
/// that vertex. The walk then switches to the other cell's edge so every ring
/// bounds a single outside area and no ring touches itself.
fn link_rings(edges: &[BoundaryEdge]) -> Vec<Vec<(i64, i64)>> {
    let mut outgoing: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.start).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut ring = vec![edges[first].start];
        let mut current = first;
        used[first] = true;

        loop {
            let edge = edges[current];
            ring.push(edge.end);
            let candidates: Vec<usize> = outgoing
                .get(&edge.end)
                .map(|c| c.iter().copied().filter(|&i| !used[i] || i == first).collect())
                .unwrap_or_default();

            let next = if candidates.len() > 1 {
                candidates
                    .iter()
                    .copied()
                    .find(|&i| edges[i].cell != edge.cell)
                    .unwrap_or(candidates[0])
            } else {
                match candidates.first() {
                    Some(&i) => i,
                    None => break,
                }
            };

            if next == first {
                break;
            }
            used[next] = true;
            current = next;
        }

        rings.push(ring);
    }

    rings
}

/// Drop vertices lying in the middle of straight runs.
/// Input is a closed ring (first == last); output is closed as well.
fn remove_collinear(ring: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let open = &ring[..ring.len() - 1];
    let n = open.len();
    let direction = |a: (i64, i64), b: (i64, i64)| ((b.0 - a.0).signum(), (b.1 - a.1).signum());

    let mut kept: Vec<(i64, i64)> = (0..n)
        .filter(|&i| {
            let prev = open[(i + n - 1) % n];
            let next = open[(i + 1) % n];
            direction(prev, open[i]) != direction(open[i], next)
        })
        .map(|i| open[i])
        .collect();
    if let Some(&head) = kept.first() {
        kept.push(head);
    }
    kept
}

fn shoelace(ring: &[(i64, i64)]) -> i64 {
    ring.windows(2)
        .map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1)
        .sum()
}

fn to_world(ring: &[(i64, i64)], transform: &GeoTransform) -> LineString<f64> {
    LineString::from(
        ring.iter()
            .map(|&(c, r)| transform.apply(c as f64, r as f64))
            .collect::<Vec<Coord<f64>>>(),
    )
}

/// Vectorize every 4-connected canopy region of the mask into one polygon
/// tagged with `value = 255`. Holes are kept as interior rings.
pub fn extract_tree_polygons(raster: &RasterMask) -> Result<GeoTable> {
    let (labels, regions) = label_regions(raster);
    if regions == 0 {
        return Err(GreenRouteError::EmptyResult(
            "No foreground pixels (value=255) found in raster".to_string(),
        ));
    }
    debug!("Found {} canopy regions", regions);

    let mut table = GeoTable::new("tree_polygons", raster.geo_core);
    for region_edges in boundary_edges(raster, &labels, regions) {
        let mut rings: Vec<Vec<(i64, i64)>> = link_rings(&region_edges)
            .iter()
            .map(|r| remove_collinear(r))
            .filter(|r| r.len() >= 4)
            .collect();

        // The outer boundary encloses every hole, so it has the largest area
        let outer = rings
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| shoelace(r).abs())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let exterior = rings.swap_remove(outer);
        let holes = rings
            .iter()
            .map(|r| to_world(r, &raster.transform))
            .collect();

        let polygon = Polygon::new(to_world(&exterior, &raster.transform), holes)
            .orient(Direction::Default);
        table.push(GeoFeature::new(Geometry::Polygon(polygon)).with_property("value", TREE_VALUE));
    }

    info!("Extracted {} tree polygons", table.len());
    Ok(table)
}
