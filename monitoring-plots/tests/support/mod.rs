//! Shared geometry helpers for integration tests.
//!
//! Test geometries are built from meter offsets relative to a grid origin
//! near the equator, so boundaries and grid cells share exact corners.

#![allow(dead_code)]

use geo::{Area, BooleanOps, CoordsIter};
use geo_types::{Coord, MultiPolygon, Point, Polygon};
use monitoring_plots::{Boundary, CoordinateMapper, GridOrigin};

pub const PLOT_SIZE: f64 = 30.0;

pub fn origin() -> GridOrigin {
    GridOrigin::new(Point::new(36.8, -1.3), 4326)
}

pub fn mapper() -> CoordinateMapper {
    CoordinateMapper::new(&origin(), 4326).expect("valid origin")
}

/// Rectangle with corners at meter offsets from the origin.
pub fn rect(west: f64, south: f64, east: f64, north: f64) -> Polygon<f64> {
    mapper().offset_rectangle(Coord { x: west, y: south }, Coord { x: east, y: north })
}

pub fn boundary(west: f64, south: f64, east: f64, north: f64) -> Boundary {
    Boundary::from_polygon(rect(west, south, east, north), 4326).expect("valid boundary")
}

/// Grid cell (column, row) of a square, asserting that it's grid aligned
/// and the expected size.
pub fn cell_of(square: &Polygon<f64>) -> (i64, i64) {
    let mapper = mapper();
    let corners: Vec<Coord<f64>> = square
        .exterior()
        .coords_iter()
        .map(|c| mapper.meters_from_origin(c))
        .collect();
    let southwest = corners[0];
    let northeast = corners[2];

    for value in [southwest.x, southwest.y] {
        let cells = value / PLOT_SIZE;
        assert!(
            (cells - cells.round()).abs() < 1e-6,
            "corner {:?} is not on the grid",
            southwest
        );
    }
    assert!((northeast.x - southwest.x - PLOT_SIZE).abs() < 1e-6);
    assert!((northeast.y - southwest.y - PLOT_SIZE).abs() < 1e-6);

    (
        (southwest.x / PLOT_SIZE).round() as i64,
        (southwest.y / PLOT_SIZE).round() as i64,
    )
}

/// Assert that no two squares share any area.
pub fn assert_no_overlap(squares: &[Polygon<f64>]) {
    for (i, a) in squares.iter().enumerate() {
        for b in &squares[i + 1..] {
            let a = MultiPolygon::new(vec![a.clone()]);
            let b = MultiPolygon::new(vec![b.clone()]);
            let shared = a.intersection(&b).unsigned_area();
            assert!(
                shared <= a.unsigned_area() * 1e-6,
                "squares overlap by {}",
                shared
            );
        }
    }
}

/// Assert that a square lies within a boundary.
pub fn assert_inside(square: &Polygon<f64>, boundary: &Boundary) {
    let square = MultiPolygon::new(vec![square.clone()]);
    let inside = square.intersection(boundary.geometry()).unsigned_area();
    assert!(
        inside / square.unsigned_area() >= 0.99999,
        "square is not inside the boundary"
    );
}
