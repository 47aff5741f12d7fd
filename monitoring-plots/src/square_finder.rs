//! Grid-aligned square search.
//!
//! Finds squares of a fixed size, positioned at whole multiples of the size
//! from a grid origin, that lie inside a usable area (a boundary minus its
//! exclusions).
//!
//! # Search
//!
//! A search starts from the meter-offset envelope of the usable area and
//! works region by region:
//!
//! ```text
//! region ──► small enough? ──yes──► test the one candidate at its SW corner
//!    │
//!    no
//!    ▼
//! a few random probes ──hit──► done
//!    │
//!    miss
//!    ▼
//! split into 4 quadrants, weight by usable area, recurse in
//! weighted-random order without replacement
//! ```
//!
//! For a typical subdivision a random probe succeeds right away; for an odd
//! shape the recursion drills down until every grid cell has been tried.

use crate::config::SquareSearchConfig;
use crate::error::{PlotError, Result};
use crate::geometry::{envelope_corners, fix_if_needed, middle_triangle, Boundary, GridOrigin};
use crate::mapper::{snap_to_grid, CoordinateMapper};
use geo::{Area, BooleanOps, BoundingRect, Intersects};
use geo_types::{Coord, MultiPolygon, Polygon, Rect};
use rand::Rng;

/// Finds unused grid-aligned squares within a boundary.
#[derive(Debug, Clone)]
pub struct UnusedSquareFinder {
    /// Boundary minus exclusion.
    usable: MultiPolygon<f64>,
    mapper: CoordinateMapper,
    config: SquareSearchConfig,
}

/// A rectangular search region in meter offsets from the grid origin.
#[derive(Debug, Clone, Copy)]
struct Region {
    southwest: Coord<f64>,
    northeast: Coord<f64>,
}

impl Region {
    fn width(&self) -> f64 {
        self.northeast.x - self.southwest.x
    }

    fn height(&self) -> f64 {
        self.northeast.y - self.southwest.y
    }

    /// True if every point in the region snaps to the same grid cell.
    fn is_single_cell(&self, interval: f64) -> bool {
        snap_to_grid(self.southwest.x, interval) == snap_to_grid(self.northeast.x, interval)
            && snap_to_grid(self.southwest.y, interval) == snap_to_grid(self.northeast.y, interval)
    }

    fn quadrants(&self) -> [Region; 4] {
        let sw = self.southwest;
        let ne = self.northeast;
        let mid = Coord {
            x: (sw.x + ne.x) / 2.0,
            y: (sw.y + ne.y) / 2.0,
        };
        [
            Region {
                southwest: sw,
                northeast: mid,
            },
            Region {
                southwest: Coord { x: mid.x, y: sw.y },
                northeast: Coord { x: ne.x, y: mid.y },
            },
            Region {
                southwest: Coord { x: sw.x, y: mid.y },
                northeast: Coord { x: mid.x, y: ne.y },
            },
            Region {
                southwest: mid,
                northeast: ne,
            },
        ]
    }
}

/// The area being searched, with its envelope for cheap rejection.
struct SearchArea<'a> {
    usable: &'a MultiPolygon<f64>,
    envelope: Rect<f64>,
}

impl UnusedSquareFinder {
    /// Create a finder for `boundary − exclusion`.
    ///
    /// `grid_origin` must be in the boundary's CRS.
    pub fn new(
        boundary: &Boundary,
        grid_origin: &GridOrigin,
        exclusion: Option<&MultiPolygon<f64>>,
        config: &SquareSearchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mapper = CoordinateMapper::new(grid_origin, boundary.srid())?;
        let exclusion = exclusion.map(|e| fix_if_needed(e.clone()));
        let usable = fix_if_needed(boundary.usable_area(exclusion.as_ref()));

        Ok(Self {
            usable,
            mapper,
            config: config.clone(),
        })
    }

    /// The geometry squares must fall inside.
    pub fn usable_area(&self) -> &MultiPolygon<f64> {
        &self.usable
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    /// Find one square completely inside the usable area.
    ///
    /// Returns `Ok(None)` if there is no room for a square.
    pub fn find_unused_square<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<Polygon<f64>>> {
        self.find_in_area(&self.usable, rng)
    }

    /// Find up to `count` squares that don't overlap each other.
    ///
    /// Returns fewer than `count` squares if the usable area runs out of
    /// room; that isn't an error at this level.
    pub fn find_unused_squares<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Polygon<f64>>> {
        let _span = tracing::debug_span!("find_unused_squares", count).entered();

        let mut usable = self.usable.clone();
        let mut squares = Vec::with_capacity(count);

        for square_number in 1..=count {
            let Some(square) = self.find_in_area(&usable, rng)? else {
                break;
            };

            if square_number < count {
                // Poison the middle of the square so it isn't chosen again.
                if let Some(triangle) = middle_triangle(&square) {
                    usable = usable.difference(&MultiPolygon::new(vec![triangle]));
                }
            }

            squares.push(square);
        }

        tracing::debug!(
            requested = count,
            found = squares.len(),
            "Square search complete"
        );

        Ok(squares)
    }

    fn find_in_area<R: Rng + ?Sized>(
        &self,
        usable: &MultiPolygon<f64>,
        rng: &mut R,
    ) -> Result<Option<Polygon<f64>>> {
        let Some(envelope) = usable.bounding_rect() else {
            return Ok(None);
        };

        // Longitude degrees shrink toward the poles, so a geographic envelope
        // isn't a rectangle in meters. Convert all four corners and take the
        // extremes.
        let corners = envelope_corners(&envelope).map(|c| self.mapper.meters_from_origin(c));
        let min_x = corners.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
        let min_y = corners.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);

        // Extend the region by half a square on every side. Random points
        // snap to the nearest grid line, so without the margin an edge cell
        // would only catch points from one side and be picked less often
        // than interior cells.
        let margin = self.config.plot_size_meters / 2.0;
        let region = Region {
            southwest: Coord {
                x: min_x - margin,
                y: min_y - margin,
            },
            northeast: Coord {
                x: max_x + margin,
                y: max_y + margin,
            },
        };

        let area = SearchArea { usable, envelope };
        self.find_in_region(&area, region, 0, rng)
    }

    fn find_in_region<R: Rng + ?Sized>(
        &self,
        area: &SearchArea<'_>,
        region: Region,
        depth: u32,
        rng: &mut R,
    ) -> Result<Option<Polygon<f64>>> {
        if depth > self.config.max_depth {
            return Err(PlotError::SearchLimitExceeded {
                max_depth: self.config.max_depth,
            });
        }

        let size = self.config.plot_size_meters;
        let half = size / 2.0;

        // Every point in the region maps to the same candidate, or the region
        // is too small to be worth probing or splitting: test its SW corner.
        if region.is_single_cell(size) || (region.width() < half && region.height() < half) {
            let square =
                self.mapper
                    .grid_aligned_square(region.southwest.x, region.southwest.y, size);
            return Ok(self.is_covered(area, &square).then_some(square));
        }

        for _ in 0..self.config.max_random_attempts {
            let x = random_between(rng, region.southwest.x, region.northeast.x);
            let y = random_between(rng, region.southwest.y, region.northeast.y);
            let square = self.mapper.grid_aligned_square(x, y, size);

            if self.is_covered(area, &square) {
                tracing::trace!(depth, x, y, "Random probe hit");
                return Ok(Some(square));
            }
        }

        // Sparse area. Search the quadrants that overlap the usable area, the
        // ones with more usable area more likely to come first.
        let quadrants = region.quadrants();
        let weights: Vec<f64> = quadrants
            .iter()
            .map(|q| {
                let rect = self.mapper.offset_rectangle(q.southwest, q.northeast);
                area.usable
                    .intersection(&MultiPolygon::new(vec![rect]))
                    .unsigned_area()
            })
            .collect();

        let mut visited: Vec<bool> = weights.iter().map(|w| *w <= 0.0).collect();
        while let Some(index) = pick_weighted(&weights, &visited, rng) {
            visited[index] = true;
            if let Some(square) = self.find_in_region(area, quadrants[index], depth + 1, rng)? {
                return Ok(Some(square));
            }
        }

        Ok(None)
    }

    /// True if the square is sufficiently covered by the usable area. An
    /// axis-aligned edge can make a square on the boundary test as slightly
    /// outside it, so full coverage isn't required.
    fn is_covered(&self, area: &SearchArea<'_>, square: &Polygon<f64>) -> bool {
        let Some(rect) = square.bounding_rect() else {
            return false;
        };
        if !rect.intersects(&area.envelope) {
            return false;
        }

        let square_area = square.unsigned_area();
        if square_area <= 0.0 {
            return false;
        }
        let covered = area
            .usable
            .intersection(&MultiPolygon::new(vec![square.clone()]))
            .unsigned_area();

        covered / square_area * 100.0 >= self.config.coverage_percent
    }
}

fn random_between<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

/// Pick an unvisited index with probability proportional to its weight.
///
/// Returns `None` once every index has been visited.
fn pick_weighted<R: Rng + ?Sized>(weights: &[f64], visited: &[bool], rng: &mut R) -> Option<usize> {
    let total: f64 = weights
        .iter()
        .zip(visited)
        .filter(|(_, v)| !**v)
        .map(|(w, _)| *w)
        .sum();

    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_unvisited = None;

    for (index, (weight, seen)) in weights.iter().zip(visited).enumerate() {
        if *seen {
            continue;
        }
        last_unvisited = Some(index);
        cumulative += weight;
        if cumulative >= target {
            return Some(index);
        }
    }

    // Float rounding can leave the cumulative sum a hair short of the target.
    last_unvisited
}
