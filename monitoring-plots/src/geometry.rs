//! Geometry inputs and planar helpers.
//!
//! This module provides:
//! - WKT parsing for boundaries and exclusions
//! - [`Boundary`] and [`GridOrigin`], geometries tagged with their SRID
//! - Coverage, difference and "poison triangle" helpers shared by the
//!   square finder, the allocator and site validation
//!
//! # Design
//!
//! Geometry operations are planar and run in the CRS of the input; the
//! square finder only compares areas as ratios, so degrees² work as well as
//! m². Anything that needs real distances goes through
//! [`CoordinateMapper`](crate::mapper::CoordinateMapper) or
//! [`area_hectares`](crate::area::area_hectares).

use crate::crs::Crs;
use crate::error::{PlotError, Result};
use geo::{Area, BooleanOps, BoundingRect, Centroid, CoordsIter};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Point, Polygon, Rect};

/// A polygonal area (site, zone or subdivision outline) in a known CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    geometry: MultiPolygon<f64>,
    srid: u32,
}

impl Boundary {
    /// Wrap a multi-polygon, normalizing self-intersections.
    ///
    /// Fails if the SRID can't be resolved or the geometry is empty, has
    /// non-finite coordinates, or has no area.
    pub fn new(geometry: MultiPolygon<f64>, srid: u32) -> Result<Self> {
        Crs::from_srid(srid)?;
        if geometry.0.is_empty() {
            return Err(PlotError::InvalidGeometry("boundary is empty".into()));
        }
        if geometry
            .coords_iter()
            .any(|c| !c.x.is_finite() || !c.y.is_finite())
        {
            return Err(PlotError::InvalidGeometry(
                "boundary has non-finite coordinates".into(),
            ));
        }

        let geometry = fix_if_needed(geometry);
        if geometry.unsigned_area() <= 0.0 {
            return Err(PlotError::InvalidGeometry("boundary has no area".into()));
        }

        Ok(Self { geometry, srid })
    }

    /// Wrap a single polygon.
    pub fn from_polygon(polygon: Polygon<f64>, srid: u32) -> Result<Self> {
        Self::new(MultiPolygon::new(vec![polygon]), srid)
    }

    /// Parse a WKT `POLYGON` or `MULTIPOLYGON`.
    pub fn from_wkt(wkt: &str, srid: u32) -> Result<Self> {
        Self::new(parse_multi_polygon(wkt)?, srid)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn srid(&self) -> u32 {
        self.srid
    }

    pub fn crs(&self) -> Result<Crs> {
        Crs::from_srid(self.srid)
    }

    /// Axis-aligned envelope in CRS units.
    pub fn envelope(&self) -> Result<Rect<f64>> {
        self.geometry
            .bounding_rect()
            .ok_or_else(|| PlotError::InvalidGeometry("boundary has no envelope".into()))
    }

    /// The boundary minus an optional exclusion, normalized.
    pub fn usable_area(&self, exclusion: Option<&MultiPolygon<f64>>) -> MultiPolygon<f64> {
        difference_nullable(&self.geometry, exclusion)
    }

    /// Centroid in CRS units.
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }
}

/// The point from which plot positions are measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOrigin {
    pub point: Point<f64>,
    pub srid: u32,
}

impl GridOrigin {
    pub fn new(point: Point<f64>, srid: u32) -> Self {
        Self { point, srid }
    }

    /// Reproject into another CRS.
    pub fn to_srid(&self, srid: u32) -> Result<Self> {
        if srid == self.srid {
            return Ok(*self);
        }
        let from = Crs::from_srid(self.srid)?;
        let to = Crs::from_srid(srid)?;
        Ok(Self {
            point: from.transform(self.point.0, &to).into(),
            srid,
        })
    }
}

/// Parse WKT string to geo-types Geometry.
pub fn parse_wkt(wkt: &str) -> Result<Geometry<f64>> {
    use std::str::FromStr;
    wkt::Wkt::from_str(wkt)
        .map_err(|e| PlotError::WktParse(format!("{:?}", e)))
        .and_then(|w| {
            w.try_into()
                .map_err(|e: wkt::conversion::Error| PlotError::WktParse(format!("{:?}", e)))
        })
}

/// Parse WKT that must describe a polygonal area.
pub fn parse_multi_polygon(wkt: &str) -> Result<MultiPolygon<f64>> {
    to_multi_polygon(parse_wkt(wkt)?)
}

/// Coerce a polygonal geometry to a multi-polygon.
pub fn to_multi_polygon(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let mut polygons = Vec::new();
            for g in gc {
                polygons.extend(to_multi_polygon(g)?.0);
            }
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(PlotError::InvalidGeometry(format!(
            "expected a polygonal geometry, got {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        _ => "Geometry",
    }
}

/// Re-run the polygon through the overlay engine, which resolves
/// self-intersections and overlapping members.
pub fn fix_if_needed(geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
    geometry.union(&MultiPolygon::new(vec![]))
}

/// `geometry − exclusion`, or `geometry` when there's no exclusion.
pub fn difference_nullable(
    geometry: &MultiPolygon<f64>,
    exclusion: Option<&MultiPolygon<f64>>,
) -> MultiPolygon<f64> {
    match exclusion {
        Some(exclusion) if !exclusion.0.is_empty() => geometry.difference(exclusion),
        _ => geometry.clone(),
    }
}

/// Union of two optional multi-polygons.
pub fn union_nullable(
    a: Option<MultiPolygon<f64>>,
    b: Option<&MultiPolygon<f64>>,
) -> Option<MultiPolygon<f64>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

/// Percentage (0–100) of `geometry`'s area that lies inside `other`.
pub fn coverage_percent(geometry: &MultiPolygon<f64>, other: &MultiPolygon<f64>) -> f64 {
    let area = geometry.unsigned_area();
    if area <= 0.0 {
        return 0.0;
    }
    geometry.intersection(other).unsigned_area() / area * 100.0
}

/// True if at least `min_percent` of `geometry` lies inside `other`.
pub fn nearly_covered_by(
    geometry: &MultiPolygon<f64>,
    other: &MultiPolygon<f64>,
    min_percent: f64,
) -> bool {
    coverage_percent(geometry, other) >= min_percent
}

/// A small triangle in the middle of a square, with legs one eighth of the
/// square's width and height.
///
/// Excluding this instead of the whole square keeps the square from being
/// chosen again without risking rounding errors that would make adjoining
/// squares look like they overlap it.
pub fn middle_triangle(square: &Polygon<f64>) -> Option<Polygon<f64>> {
    let rect = square.bounding_rect()?;
    let middle = square.centroid()?;
    let width = rect.width() / 8.0;
    let height = rect.height() / 8.0;

    Some(Polygon::new(
        LineString::from(vec![
            (middle.x(), middle.y()),
            (middle.x() + width, middle.y()),
            (middle.x(), middle.y() + height),
            (middle.x(), middle.y()),
        ]),
        vec![],
    ))
}

/// Union of the middle triangles of a set of squares.
pub fn middle_triangles<'a>(
    squares: impl IntoIterator<Item = &'a Polygon<f64>>,
) -> Option<MultiPolygon<f64>> {
    let triangles: Vec<Polygon<f64>> = squares.into_iter().filter_map(middle_triangle).collect();
    if triangles.is_empty() {
        None
    } else {
        Some(fix_if_needed(MultiPolygon::new(triangles)))
    }
}

/// The four corners of an envelope, southwest first, counterclockwise.
pub fn envelope_corners(rect: &Rect<f64>) -> [Coord<f64>; 4] {
    let min = rect.min();
    let max = rect.max();
    [
        min,
        Coord { x: max.x, y: min.y },
        max,
        Coord { x: min.x, y: max.y },
    ]
}
