//! Meter offsets relative to a grid origin.
//!
//! Plot positions are defined in meters east and north of a site's grid
//! origin. The mapper converts between CRS coordinates and those offsets by
//! solving the geodesic problem on the WGS84 ellipsoid: the offset of a
//! point is its geodesic distance from the origin decomposed along the
//! azimuth, and the reverse direction walks that distance along that
//! azimuth. Because both directions use the same decomposition, a square
//! built from offsets maps back to exactly those offsets.

use crate::crs::Crs;
use crate::error::{PlotError, Result};
use crate::geometry::GridOrigin;
use geo::{Bearing, Destination, Distance, Geodesic};
use geo_types::{Coord, LineString, Point, Polygon};

/// Converts between CRS coordinates and meter offsets from a grid origin.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    crs: Crs,
    /// Grid origin as WGS84 longitude/latitude.
    origin: Point<f64>,
}

impl CoordinateMapper {
    /// Create a mapper for geometries in `srid` anchored at `origin`.
    ///
    /// The origin must already be expressed in the same CRS.
    pub fn new(origin: &GridOrigin, srid: u32) -> Result<Self> {
        if origin.srid != srid {
            return Err(PlotError::CrsMismatch {
                expected: srid,
                actual: origin.srid,
            });
        }
        let crs = Crs::from_srid(srid)?;
        if !origin.point.x().is_finite() || !origin.point.y().is_finite() {
            return Err(PlotError::InvalidGeometry(
                "grid origin has non-finite coordinates".into(),
            ));
        }
        Ok(Self {
            crs,
            origin: crs.to_lon_lat(origin.point.0).into(),
        })
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Distance from the grid origin to a coordinate as an offset in meters
    /// along each axis (x east, y north).
    pub fn meters_from_origin(&self, coord: Coord<f64>) -> Coord<f64> {
        let target: Point<f64> = self.crs.to_lon_lat(coord).into();
        let distance = Geodesic::distance(self.origin, target);
        if distance == 0.0 {
            return Coord { x: 0.0, y: 0.0 };
        }
        let azimuth = Geodesic::bearing(self.origin, target).to_radians();
        Coord {
            x: azimuth.sin() * distance,
            y: azimuth.cos() * distance,
        }
    }

    /// The CRS coordinate at a meter offset from the grid origin.
    pub fn coord_at_offset(&self, offset: Coord<f64>) -> Coord<f64> {
        let distance = offset.x.hypot(offset.y);
        if distance == 0.0 {
            return self.crs.from_lon_lat(self.origin.0);
        }
        let azimuth = offset.x.atan2(offset.y).to_degrees();
        let destination = Geodesic::destination(self.origin, azimuth, distance);
        self.crs.from_lon_lat(destination.0)
    }

    /// A rectangle whose corners are at the given meter offsets.
    pub fn offset_rectangle(&self, southwest: Coord<f64>, northeast: Coord<f64>) -> Polygon<f64> {
        let corners = [
            southwest,
            Coord {
                x: northeast.x,
                y: southwest.y,
            },
            northeast,
            Coord {
                x: southwest.x,
                y: northeast.y,
            },
        ];
        let mut ring: Vec<Coord<f64>> = corners.iter().map(|c| self.coord_at_offset(*c)).collect();
        ring.push(ring[0]);
        Polygon::new(LineString::new(ring), vec![])
    }

    /// A square `size` meters on a side whose southwest corner is the grid
    /// intersection nearest to the given offsets.
    pub fn grid_aligned_square(&self, west: f64, south: f64, size: f64) -> Polygon<f64> {
        let west = snap_to_grid(west, size);
        let south = snap_to_grid(south, size);
        self.offset_rectangle(
            Coord { x: west, y: south },
            Coord {
                x: west + size,
                y: south + size,
            },
        )
    }
}

/// Round a meter offset to the nearest multiple of `interval`, with halves
/// rounding up.
pub fn snap_to_grid(value: f64, interval: f64) -> f64 {
    (value / interval + 0.5).floor() * interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{BoundingRect, CoordsIter};

    fn wgs84_mapper() -> CoordinateMapper {
        let origin = GridOrigin::new(Point::new(36.8, -1.3), 4326);
        CoordinateMapper::new(&origin, 4326).unwrap()
    }

    fn assert_close(a: f64, b: f64, tolerance: f64) {
        assert!((a - b).abs() <= tolerance, "{} != {} (±{})", a, b, tolerance);
    }

    #[test]
    fn test_snap_to_grid_rounds_half_up() {
        assert_eq!(snap_to_grid(44.9, 30.0), 30.0);
        assert_eq!(snap_to_grid(45.0, 30.0), 60.0);
        assert_eq!(snap_to_grid(-15.0, 30.0), 0.0);
        assert_eq!(snap_to_grid(-15.1, 30.0), -30.0);
        assert_eq!(snap_to_grid(0.0, 30.0), 0.0);
    }

    #[test]
    fn test_origin_is_zero_offset() {
        let mapper = wgs84_mapper();
        let offset = mapper.meters_from_origin(Coord { x: 36.8, y: -1.3 });
        assert_eq!(offset, Coord { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_offset_roundtrip() {
        let mapper = wgs84_mapper();
        for (x, y) in [(30.0, 0.0), (0.0, 90.0), (-120.0, 45.0), (1234.5, -678.9)] {
            let coord = mapper.coord_at_offset(Coord { x, y });
            let back = mapper.meters_from_origin(coord);
            assert_close(back.x, x, 1e-6);
            assert_close(back.y, y, 1e-6);
        }
    }

    #[test]
    fn test_one_degree_north_at_equator() {
        let origin = GridOrigin::new(Point::new(0.0, 0.0), 4326);
        let mapper = CoordinateMapper::new(&origin, 4326).unwrap();
        let offset = mapper.meters_from_origin(Coord { x: 0.0, y: 1.0 });
        assert_close(offset.x, 0.0, 1e-6);
        assert_close(offset.y, 110_574.389, 0.01);
    }

    #[test]
    fn test_utm_offsets_are_ground_meters() {
        // On the central meridian UTM coordinates are scaled by 0.9996.
        let origin = GridOrigin::new(Point::new(500_000.0, 1_000_000.0), 32633);
        let mapper = CoordinateMapper::new(&origin, 32633).unwrap();
        let offset = mapper.meters_from_origin(Coord {
            x: 500_000.0,
            y: 1_000_099.96,
        });
        assert_close(offset.x, 0.0, 1e-3);
        assert_close(offset.y, 100.0, 1e-3);
    }

    #[test]
    fn test_grid_aligned_square_corners() {
        let mapper = wgs84_mapper();
        let square = mapper.grid_aligned_square(44.0, 14.0, 30.0);
        let corners: Vec<Coord<f64>> = square
            .exterior()
            .coords_iter()
            .map(|c| mapper.meters_from_origin(c))
            .collect();
        assert_eq!(corners.len(), 5);
        assert_close(corners[0].x, 30.0, 1e-6);
        assert_close(corners[0].y, 0.0, 1e-6);
        assert_close(corners[2].x, 60.0, 1e-6);
        assert_close(corners[2].y, 30.0, 1e-6);
        assert!(square.bounding_rect().is_some());
    }

    #[test]
    fn test_rejects_mismatched_origin_crs() {
        let origin = GridOrigin::new(Point::new(36.8, -1.3), 4326);
        let err = CoordinateMapper::new(&origin, 32737).unwrap_err();
        assert_eq!(
            err,
            PlotError::CrsMismatch {
                expected: 32737,
                actual: 4326
            }
        );
    }
}
