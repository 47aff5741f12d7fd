//! Choosing monitoring plots for an observation.
//!
//! Permanent plots are existing plots selected by index. Temporary plots
//! are new squares, spread across a zone's subdivisions so that no two
//! subdivisions differ by more than one plot.
//!
//! # Spreading temporary plots
//!
//! Every subdivision, requested or not, takes part in the spread:
//!
//! 1. Each gets `num_temporary_plots / subdivision_count` plots.
//! 2. The remainder goes one each to the subdivisions that sort first by
//!    (permanent plot count, requested before unrequested, id).
//! 3. Unrequested subdivisions then drop their share.
//!
//! Dropping unrequested subdivisions only after spreading keeps an
//! observation of a few subdivisions from piling the whole zone's worth of
//! temporary plots into them.
//!
//! # Ineligible plots
//!
//! Existing plots that can't be reused as temporary plots (unavailable,
//! explicitly excluded, or permanent) are kept out of the search by adding
//! the middle triangle of each to the exclusion. Excluding the whole plot
//! would risk rounding errors making its neighbors look excluded too.

use crate::config::SquareSearchConfig;
use crate::error::{PlotError, Result};
use crate::geometry::{middle_triangles, union_nullable, Boundary, GridOrigin};
use crate::model::{ExistingSubdivision, ExistingZone, PlotId, SubdivisionId};
use crate::square_finder::UnusedSquareFinder;
use geo_types::{MultiPolygon, Polygon};
use rand::Rng;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use wkt::ToWkt;

/// Inputs for choosing temporary plots.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    /// Subdivisions included in the observation.
    pub requested_subdivision_ids: FxHashSet<SubdivisionId>,
    /// Must be in the zone boundary's CRS.
    pub grid_origin: GridOrigin,
    /// Areas to keep plots out of, such as the site's exclusion.
    pub exclusion: Option<MultiPolygon<f64>>,
}

impl AllocationRequest {
    pub fn new(
        requested_subdivision_ids: impl IntoIterator<Item = SubdivisionId>,
        grid_origin: GridOrigin,
    ) -> Self {
        Self {
            requested_subdivision_ids: requested_subdivision_ids.into_iter().collect(),
            grid_origin,
            exclusion: None,
        }
    }

    pub fn with_exclusion(mut self, exclusion: MultiPolygon<f64>) -> Self {
        self.exclusion = Some(exclusion);
        self
    }

    fn is_requested(&self, subdivision: &ExistingSubdivision) -> bool {
        self.requested_subdivision_ids.contains(&subdivision.id)
    }
}

/// A new temporary plot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotAssignment {
    pub subdivision_id: SubdivisionId,
    pub boundary: Polygon<f64>,
}

impl PlotAssignment {
    /// The plot boundary as WKT.
    pub fn boundary_wkt(&self) -> String {
        self.boundary.wkt_string()
    }
}

/// Options for a free-form square search within a zone.
#[derive(Debug, Clone)]
pub struct FindSquaresOptions<'a> {
    pub count: usize,
    pub grid_origin: &'a GridOrigin,
    /// Where to search. Default: the zone boundary.
    pub search_boundary: Option<&'a Boundary>,
    pub exclusion: Option<&'a MultiPolygon<f64>>,
    pub excluded_plot_ids: FxHashSet<PlotId>,
    /// Treat every permanent plot as ineligible, not just the ones the next
    /// observation will use.
    pub exclude_all_permanent_plots: bool,
    /// Default: the allocator's configured plot size.
    pub plot_size_meters: Option<f64>,
}

impl<'a> FindSquaresOptions<'a> {
    pub fn new(count: usize, grid_origin: &'a GridOrigin) -> Self {
        Self {
            count,
            grid_origin,
            search_boundary: None,
            exclusion: None,
            excluded_plot_ids: FxHashSet::default(),
            exclude_all_permanent_plots: false,
            plot_size_meters: None,
        }
    }

    pub fn with_search_boundary(mut self, boundary: &'a Boundary) -> Self {
        self.search_boundary = Some(boundary);
        self
    }

    pub fn with_exclusion(mut self, exclusion: Option<&'a MultiPolygon<f64>>) -> Self {
        self.exclusion = exclusion;
        self
    }

    pub fn with_excluded_plots(mut self, ids: impl IntoIterator<Item = PlotId>) -> Self {
        self.excluded_plot_ids.extend(ids);
        self
    }

    pub fn exclude_all_permanent_plots(mut self) -> Self {
        self.exclude_all_permanent_plots = true;
        self
    }

    pub fn with_plot_size(mut self, plot_size_meters: f64) -> Self {
        self.plot_size_meters = Some(plot_size_meters);
        self
    }
}

/// Chooses permanent and temporary plots within one zone.
#[derive(Debug, Clone)]
pub struct PlotAllocator<'a> {
    zone: &'a ExistingZone,
    config: SquareSearchConfig,
}

impl<'a> PlotAllocator<'a> {
    pub fn new(zone: &'a ExistingZone) -> Self {
        Self {
            zone,
            config: SquareSearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SquareSearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn zone(&self) -> &ExistingZone {
        self.zone
    }

    /// Ids of the plots in the requested subdivisions that are among the
    /// zone's first `num_permanent_plots` permanent plots.
    pub fn choose_permanent_plots(
        &self,
        requested_subdivision_ids: &FxHashSet<SubdivisionId>,
    ) -> Result<BTreeSet<PlotId>> {
        self.require_subdivisions()?;
        let num_permanent = self.zone.plot_counts()?.num_permanent_plots;

        let chosen: BTreeSet<PlotId> = self
            .zone
            .subdivisions
            .iter()
            .filter(|subdivision| requested_subdivision_ids.contains(&subdivision.id))
            .flat_map(|subdivision| subdivision.monitoring_plots.iter())
            .filter(|plot| plot.is_permanent_within(num_permanent))
            .map(|plot| plot.id)
            .collect();

        tracing::debug!(
            zone = %self.zone,
            num_permanent,
            chosen = chosen.len(),
            "Chose permanent plots"
        );

        Ok(chosen)
    }

    /// Place new temporary plots in the requested subdivisions.
    ///
    /// Fails with [`PlotError::SubdivisionFull`] if any requested
    /// subdivision lacks room for its share; nothing is returned for the
    /// other subdivisions in that case.
    pub fn choose_temporary_plots<R: Rng + ?Sized>(
        &self,
        request: &AllocationRequest,
        rng: &mut R,
    ) -> Result<Vec<PlotAssignment>> {
        let span = tracing::debug_span!(
            "choose_temporary_plots",
            zone = %self.zone,
            requested = request.requested_subdivision_ids.len()
        );
        let _guard = span.enter();

        self.require_subdivisions()?;
        self.config.validate()?;
        let counts = self.zone.plot_counts()?;
        let num_permanent = counts.num_permanent_plots;
        let num_temporary = counts.num_temporary_plots as usize;

        let subdivision_count = self.zone.subdivisions.len();
        let even_share = num_temporary / subdivision_count;
        let remainder = num_temporary % subdivision_count;

        let mut ordered: Vec<&ExistingSubdivision> = self.zone.subdivisions.iter().collect();
        ordered.sort_by_key(|subdivision| {
            (
                subdivision.count_permanent_within(num_permanent),
                if request.is_requested(subdivision) { 0 } else { 1 },
                subdivision.id,
            )
        });

        let ineligible = self.ineligible_plot_exclusion(false, &FxHashSet::default())?;
        let exclusion = union_nullable(ineligible, request.exclusion.as_ref());

        let mut assignments = Vec::with_capacity(num_temporary);

        for (position, subdivision) in ordered.into_iter().enumerate() {
            if !request.is_requested(subdivision) {
                continue;
            }

            let plots_needed = if position < remainder {
                even_share + 1
            } else {
                even_share
            };
            if plots_needed == 0 {
                continue;
            }

            let finder = UnusedSquareFinder::new(
                &subdivision.boundary,
                &request.grid_origin,
                exclusion.as_ref(),
                &self.config,
            )?;
            let squares = finder.find_unused_squares(plots_needed, rng)?;

            tracing::debug!(
                subdivision = %subdivision.id,
                position,
                plots_needed,
                found = squares.len(),
                "Placed temporary plots"
            );

            if squares.len() < plots_needed {
                tracing::warn!(
                    subdivision = %subdivision.id,
                    plots_needed,
                    plots_available = squares.len(),
                    "Subdivision is full"
                );
                return Err(PlotError::SubdivisionFull {
                    subdivision_id: subdivision.id,
                    plots_needed,
                    plots_available: squares.len(),
                });
            }

            assignments.extend(squares.into_iter().map(|boundary| PlotAssignment {
                subdivision_id: subdivision.id,
                boundary,
            }));
        }

        Ok(assignments)
    }

    /// Find up to `options.count` unused squares that don't overlap each
    /// other or any ineligible existing plot.
    pub fn find_unused_squares<R: Rng + ?Sized>(
        &self,
        options: &FindSquaresOptions<'_>,
        rng: &mut R,
    ) -> Result<Vec<Polygon<f64>>> {
        let mut config = self.config.clone();
        if let Some(size) = options.plot_size_meters {
            config = config.with_plot_size(size);
        }
        config.validate().map_err(|e| match e {
            PlotError::InvalidConfig(message) => PlotError::InvalidArgument(message),
            other => other,
        })?;

        let ineligible = self.ineligible_plot_exclusion(
            options.exclude_all_permanent_plots,
            &options.excluded_plot_ids,
        )?;
        let exclusion = union_nullable(ineligible, options.exclusion);
        let boundary = options.search_boundary.unwrap_or(&self.zone.boundary);

        let finder =
            UnusedSquareFinder::new(boundary, options.grid_origin, exclusion.as_ref(), &config)?;
        finder.find_unused_squares(options.count, rng)
    }

    fn require_subdivisions(&self) -> Result<()> {
        if self.zone.subdivisions.is_empty() {
            return Err(PlotError::NoSubdivisions(self.zone.to_string()));
        }
        Ok(())
    }

    /// Middle triangles of every plot a new square must not reuse: the
    /// unavailable ones, the explicitly excluded ones, and the permanent ones
    /// (only those the next observation will use, unless `all_permanent`).
    fn ineligible_plot_exclusion(
        &self,
        all_permanent: bool,
        excluded_plot_ids: &FxHashSet<PlotId>,
    ) -> Result<Option<MultiPolygon<f64>>> {
        let num_permanent = if all_permanent {
            None
        } else {
            Some(self.zone.plot_counts()?.num_permanent_plots)
        };

        let ineligible = self.zone.plots().filter(|plot| {
            !plot.is_available
                || excluded_plot_ids.contains(&plot.id)
                || match num_permanent {
                    None => plot.permanent_index.is_some(),
                    Some(n) => plot.is_permanent_within(n),
                }
        });

        Ok(middle_triangles(ineligible.map(|plot| &plot.boundary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::CoordinateMapper;
    use crate::model::{MonitoringPlot, PlotCounts, ZoneId};
    use geo_types::{polygon, Coord, Point};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn origin() -> GridOrigin {
        GridOrigin::new(Point::new(36.8, -1.3), 4326)
    }

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(&origin(), 4326).unwrap()
    }

    fn rect(west: f64, south: f64, east: f64, north: f64) -> Polygon<f64> {
        mapper().offset_rectangle(Coord { x: west, y: south }, Coord { x: east, y: north })
    }

    fn boundary(west: f64, south: f64, east: f64, north: f64) -> Boundary {
        Boundary::from_polygon(rect(west, south, east, north), 4326).unwrap()
    }

    fn plot(id: i64, column: f64, row: f64) -> MonitoringPlot {
        MonitoringPlot::new(
            PlotId(id),
            rect(column * 30.0, row * 30.0, column * 30.0 + 30.0, row * 30.0 + 30.0),
        )
    }

    /// Three 30 × 90 m columns side by side.
    fn three_column_zone(counts: PlotCounts) -> ExistingZone {
        let subdivisions = (0..3)
            .map(|i| {
                let west = i as f64 * 30.0;
                ExistingSubdivision::new(
                    SubdivisionId(i + 1),
                    format!("Column {}", i + 1),
                    boundary(west, 0.0, west + 30.0, 90.0),
                )
            })
            .collect();
        ExistingZone::new(ZoneId(1), "Zone", boundary(0.0, 0.0, 90.0, 90.0), subdivisions)
            .with_plot_counts(counts)
    }

    fn per_subdivision(assignments: &[PlotAssignment]) -> BTreeMap<SubdivisionId, usize> {
        let mut counts = BTreeMap::new();
        for assignment in assignments {
            *counts.entry(assignment.subdivision_id).or_default() += 1;
        }
        counts
    }

    fn all(ids: &[i64]) -> FxHashSet<SubdivisionId> {
        ids.iter().map(|id| SubdivisionId(*id)).collect()
    }

    #[test]
    fn test_spreads_plots_evenly() {
        let zone = three_column_zone(PlotCounts::new(0, 4));
        let request = AllocationRequest::new(all(&[1, 2, 3]), origin());
        let mut rng = StdRng::seed_from_u64(1);

        let assignments = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap();

        assert_eq!(assignments.len(), 4);
        let counts = per_subdivision(&assignments);
        assert_eq!(counts[&SubdivisionId(1)], 2);
        assert_eq!(counts[&SubdivisionId(2)], 1);
        assert_eq!(counts[&SubdivisionId(3)], 1);
    }

    #[test]
    fn test_remainder_goes_to_fewest_permanent_plots() {
        let mut zone = three_column_zone(PlotCounts::new(1, 4));
        zone.subdivisions[0].monitoring_plots = vec![plot(1, 0.0, 0.0).with_permanent_index(1)];
        let request = AllocationRequest::new(all(&[1, 2, 3]), origin());
        let mut rng = StdRng::seed_from_u64(2);

        let assignments = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap();

        let counts = per_subdivision(&assignments);
        assert_eq!(counts[&SubdivisionId(1)], 1);
        assert_eq!(counts[&SubdivisionId(2)], 2);
        assert_eq!(counts[&SubdivisionId(3)], 1);
    }

    #[test]
    fn test_unrequested_subdivisions_keep_their_place_in_line() {
        // Remainder 2 goes to positions 0 and 1 of (2, 3, 1). Subdivision 1
        // sorts last because it wasn't requested; 2 and 3 each get 2.
        let zone = three_column_zone(PlotCounts::new(0, 5));
        let request = AllocationRequest::new(all(&[2, 3]), origin());
        let mut rng = StdRng::seed_from_u64(3);

        let assignments = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap();

        let counts = per_subdivision(&assignments);
        assert_eq!(counts.get(&SubdivisionId(1)), None);
        assert_eq!(counts[&SubdivisionId(2)], 2);
        assert_eq!(counts[&SubdivisionId(3)], 2);
    }

    #[test]
    fn test_unrequested_subdivision_with_fewer_permanent_plots_absorbs_remainder() {
        // Subdivision 3 has no permanent plots, so it sorts first and takes
        // the only extra plot even though it wasn't requested.
        let mut zone = three_column_zone(PlotCounts::new(2, 4));
        zone.subdivisions[0].monitoring_plots = vec![plot(1, 0.0, 0.0).with_permanent_index(1)];
        zone.subdivisions[1].monitoring_plots = vec![plot(2, 1.0, 0.0).with_permanent_index(2)];
        let request = AllocationRequest::new(all(&[1, 2]), origin());
        let mut rng = StdRng::seed_from_u64(4);

        let assignments = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap();

        let counts = per_subdivision(&assignments);
        assert_eq!(counts[&SubdivisionId(1)], 1);
        assert_eq!(counts[&SubdivisionId(2)], 1);
        assert_eq!(assignments.len(), 2);
    }

    #[test]
    fn test_permanent_plots_are_not_reused() {
        let mut zone = three_column_zone(PlotCounts::new(2, 3));
        zone.subdivisions[0].monitoring_plots = vec![
            plot(1, 0.0, 0.0).with_permanent_index(1),
            plot(2, 0.0, 1.0).with_permanent_index(2),
        ];
        let request = AllocationRequest::new(all(&[1]), origin());
        let mut rng = StdRng::seed_from_u64(5);

        let assignments = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap();

        assert_eq!(assignments.len(), 1);
        let offset = mapper().meters_from_origin(assignments[0].boundary.exterior().0[0]);
        assert!((offset.y - 60.0).abs() < 1e-6, "placed at {:?}", offset);
    }

    #[test]
    fn test_full_subdivision_is_reported() {
        let mut zone = three_column_zone(PlotCounts::new(0, 6));
        zone.subdivisions[0].monitoring_plots = vec![
            plot(1, 0.0, 0.0).with_availability(false),
            plot(2, 0.0, 1.0).with_availability(false),
        ];
        let request = AllocationRequest::new(all(&[1, 2, 3]), origin());
        let mut rng = StdRng::seed_from_u64(6);

        let err = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap_err();

        assert_eq!(
            err,
            PlotError::SubdivisionFull {
                subdivision_id: SubdivisionId(1),
                plots_needed: 2,
                plots_available: 1,
            }
        );
        assert!(err.is_capacity());
    }

    #[test]
    fn test_request_exclusion_is_respected() {
        let zone = three_column_zone(PlotCounts::new(0, 3));
        let exclusion = MultiPolygon::new(vec![rect(0.0, 0.0, 90.0, 60.0)]);
        let request = AllocationRequest::new(all(&[1, 2, 3]), origin()).with_exclusion(exclusion);
        let mut rng = StdRng::seed_from_u64(7);

        let assignments = PlotAllocator::new(&zone)
            .choose_temporary_plots(&request, &mut rng)
            .unwrap();

        assert_eq!(assignments.len(), 3);
        for assignment in &assignments {
            let offset = mapper().meters_from_origin(assignment.boundary.exterior().0[0]);
            assert!((offset.y - 60.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_no_subdivisions() {
        let zone = ExistingZone::new(ZoneId(9), "Empty", boundary(0.0, 0.0, 90.0, 90.0), vec![])
            .with_plot_counts(PlotCounts::new(1, 1));
        let request = AllocationRequest::new(all(&[1]), origin());
        let mut rng = StdRng::seed_from_u64(8);

        let allocator = PlotAllocator::new(&zone);
        assert!(matches!(
            allocator.choose_temporary_plots(&request, &mut rng),
            Err(PlotError::NoSubdivisions(_))
        ));
        assert!(matches!(
            allocator.choose_permanent_plots(&all(&[1])),
            Err(PlotError::NoSubdivisions(_))
        ));
    }

    #[test]
    fn test_unconfigured_counts() {
        let mut zone = three_column_zone(PlotCounts::new(1, 1));
        zone.plot_counts = None;
        let request = AllocationRequest::new(all(&[1]), origin());
        let mut rng = StdRng::seed_from_u64(9);

        assert!(matches!(
            PlotAllocator::new(&zone).choose_temporary_plots(&request, &mut rng),
            Err(PlotError::PlotCountsUnconfigured(_))
        ));
    }

    #[test]
    fn test_choose_permanent_plots() {
        let mut zone = three_column_zone(PlotCounts::new(2, 1));
        zone.subdivisions[0].monitoring_plots = vec![
            plot(10, 0.0, 0.0).with_permanent_index(1),
            plot(11, 0.0, 1.0).with_permanent_index(3),
            plot(12, 0.0, 2.0),
        ];
        zone.subdivisions[1].monitoring_plots = vec![plot(20, 1.0, 0.0).with_permanent_index(2)];

        let allocator = PlotAllocator::new(&zone);
        let chosen = allocator.choose_permanent_plots(&all(&[1, 2])).unwrap();
        assert_eq!(chosen.into_iter().collect::<Vec<_>>(), vec![PlotId(10), PlotId(20)]);

        let only_first = allocator.choose_permanent_plots(&all(&[1])).unwrap();
        assert_eq!(only_first.into_iter().collect::<Vec<_>>(), vec![PlotId(10)]);

        assert_eq!(
            allocator.choose_permanent_plots(&all(&[1, 2])).unwrap(),
            allocator.choose_permanent_plots(&all(&[1, 2])).unwrap()
        );
    }

    #[test]
    fn test_find_unused_squares_options() {
        let mut zone = three_column_zone(PlotCounts::new(1, 1));
        zone.subdivisions[0].monitoring_plots = vec![
            plot(1, 0.0, 0.0).with_permanent_index(1),
            plot(2, 0.0, 1.0).with_permanent_index(5),
            plot(3, 0.0, 2.0),
        ];
        let allocator = PlotAllocator::new(&zone);
        let origin = origin();
        let column = zone.subdivisions[0].boundary.clone();

        // Permanent index 5 is beyond the zone's count, so only plot 1 is out.
        let options = FindSquaresOptions::new(3, &origin).with_search_boundary(&column);
        let found = allocator
            .find_unused_squares(&options, &mut StdRng::seed_from_u64(10))
            .unwrap();
        assert_eq!(found.len(), 2);

        let options = FindSquaresOptions::new(3, &origin)
            .with_search_boundary(&column)
            .exclude_all_permanent_plots();
        let found = allocator
            .find_unused_squares(&options, &mut StdRng::seed_from_u64(11))
            .unwrap();
        assert_eq!(found.len(), 1);

        let options = FindSquaresOptions::new(3, &origin)
            .with_search_boundary(&column)
            .exclude_all_permanent_plots()
            .with_excluded_plots([PlotId(3)]);
        let found = allocator
            .find_unused_squares(&options, &mut StdRng::seed_from_u64(12))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_rejects_zero_plot_size() {
        let zone = three_column_zone(PlotCounts::new(1, 1));
        let origin = origin();
        let options = FindSquaresOptions::new(1, &origin).with_plot_size(0.0);
        assert!(matches!(
            PlotAllocator::new(&zone).find_unused_squares(&options, &mut StdRng::seed_from_u64(0)),
            Err(PlotError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_boundary_wkt() {
        let assignment = PlotAssignment {
            subdivision_id: SubdivisionId(1),
            boundary: polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 1.0),
            ],
        };
        assert!(assignment.boundary_wkt().starts_with("POLYGON(("));
    }
}
