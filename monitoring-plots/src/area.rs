//! Areas in hectares.
//!
//! Projected boundaries are measured as-is. Geographic boundaries are first
//! reprojected into the UTM zone containing their centroid, which keeps
//! scale error well under a percent for anything the size of a site.

use crate::crs::Crs;
use crate::error::{PlotError, Result};
use crate::geometry::Boundary;
use bigdecimal::{BigDecimal, RoundingMode};
use geo::{Area, Centroid, MapCoords};
use geo_types::MultiPolygon;
use num_traits::FromPrimitive;

/// Decimal places kept in hectare values.
pub const HECTARES_SCALE: i64 = 1;

const SQUARE_METERS_PER_HECTARE: u32 = 10_000;

/// Area of `boundary − exclusion` in hectares, rounded half up to
/// [`HECTARES_SCALE`] places.
pub fn area_hectares(
    boundary: &Boundary,
    exclusion: Option<&MultiPolygon<f64>>,
) -> Result<BigDecimal> {
    let usable = boundary.usable_area(exclusion);
    let square_meters = square_meters(&usable, boundary.crs()?);
    to_hectares(square_meters)
}

/// Area of the boundary's axis-aligned envelope in hectares.
pub fn envelope_area_hectares(boundary: &Boundary) -> Result<BigDecimal> {
    let envelope = Boundary::from_polygon(boundary.envelope()?.to_polygon(), boundary.srid())?;
    area_hectares(&envelope, None)
}

fn square_meters(geometry: &MultiPolygon<f64>, crs: Crs) -> f64 {
    if crs.is_projected() {
        return geometry.unsigned_area();
    }

    let Some(centroid) = geometry.centroid() else {
        return 0.0;
    };
    let utm = Crs::utm_for(crs.to_lon_lat(centroid.0));
    tracing::trace!(utm = utm.srid(), "Measuring geographic area in UTM");

    geometry
        .map_coords(|coord| crs.transform(coord, &utm))
        .unsigned_area()
}

fn to_hectares(square_meters: f64) -> Result<BigDecimal> {
    let square_meters = BigDecimal::from_f64(square_meters)
        .ok_or_else(|| PlotError::InvalidGeometry(format!("area {} is not finite", square_meters)))?;
    let hectares = square_meters / BigDecimal::from(SQUARE_METERS_PER_HECTARE);
    Ok(hectares.with_scale_round(HECTARES_SCALE, RoundingMode::HalfUp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GridOrigin;
    use crate::mapper::CoordinateMapper;
    use geo_types::{polygon, Coord, Point, Polygon};
    use num_traits::{ToPrimitive, Zero};

    fn utm_square(x: f64, y: f64, width: f64, height: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + width, y: y),
            (x: x + width, y: y + height),
            (x: x, y: y + height),
        ]
    }

    #[test]
    fn test_projected_square_kilometer() {
        let boundary =
            Boundary::from_polygon(utm_square(500_000.0, 9_800_000.0, 1000.0, 1000.0), 32737)
                .unwrap();
        let area = area_hectares(&boundary, None).unwrap();
        assert_eq!(area.to_string(), "100.0");
    }

    #[test]
    fn test_exclusion_is_subtracted() {
        let boundary =
            Boundary::from_polygon(utm_square(500_000.0, 9_800_000.0, 1000.0, 1000.0), 32737)
                .unwrap();
        let exclusion =
            MultiPolygon::new(vec![utm_square(500_000.0, 9_800_000.0, 500.0, 1000.0)]);
        let area = area_hectares(&boundary, Some(&exclusion)).unwrap();
        assert_eq!(area.to_string(), "50.0");
    }

    #[test]
    fn test_rounds_half_up() {
        assert_eq!(to_hectares(1500.0).unwrap().to_string(), "0.2");
        assert_eq!(to_hectares(1449.0).unwrap().to_string(), "0.1");

        // Zero keeps its scale even though it displays as "0".
        let zero = to_hectares(0.0).unwrap();
        assert!(zero.is_zero());
        assert_eq!(zero.as_bigint_and_exponent().1, HECTARES_SCALE);
        assert_eq!(to_hectares(499.0).unwrap(), zero);
    }

    #[test]
    fn test_geographic_boundary_is_measured_in_meters() {
        // A 1 km square on the central meridian of UTM zone 37.
        let origin = GridOrigin::new(Point::new(39.0, -1.3), 4326);
        let mapper = CoordinateMapper::new(&origin, 4326).unwrap();
        let square = mapper.offset_rectangle(Coord { x: 0.0, y: 0.0 }, Coord { x: 1000.0, y: 1000.0 });
        let boundary = Boundary::from_polygon(square, 4326).unwrap();

        let area = area_hectares(&boundary, None).unwrap().to_f64().unwrap();
        assert!((area - 100.0).abs() <= 0.15, "area was {}", area);
    }

    #[test]
    fn test_envelope_area() {
        let triangle = polygon![
            (x: 500_000.0, y: 9_800_000.0),
            (x: 501_000.0, y: 9_800_000.0),
            (x: 500_000.0, y: 9_801_000.0),
        ];
        let boundary = Boundary::from_polygon(triangle, 32737).unwrap();
        assert_eq!(area_hectares(&boundary, None).unwrap().to_string(), "50.0");
        assert_eq!(envelope_area_hectares(&boundary).unwrap().to_string(), "100.0");
    }
}
