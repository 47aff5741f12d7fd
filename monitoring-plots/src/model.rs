//! Sites, zones, subdivisions and monitoring plots.
//!
//! A site is divided into zones, and each zone into subdivisions. Plot
//! counts are configured per zone; plots live in subdivisions.
//!
//! Entities that haven't been stored yet have no ids, so new and existing
//! ones are separate types ([`NewZone`] / [`ExistingZone`],
//! [`NewSubdivision`] / [`ExistingSubdivision`]) instead of one type with
//! optional ids.

use crate::area::area_hectares;
use crate::config::{PlotCountConfig, MONITORING_PLOT_SIZE};
use crate::error::{PlotError, Result};
use crate::geometry::{envelope_corners, Boundary, GridOrigin};
use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::{ToPrimitive, Zero};
use geo::{Area, BooleanOps, Centroid, Contains, Intersects};
use geo_types::{Geometry, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifies a stored monitoring plot.
    PlotId
);
id_type!(
    /// Identifies a stored subdivision.
    SubdivisionId
);
id_type!(
    /// Identifies a stored zone.
    ZoneId
);

// ============================================================================
// Monitoring plots
// ============================================================================

/// A square sampling location that has already been placed.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringPlot {
    pub id: PlotId,
    pub boundary: Polygon<f64>,
    /// Unavailable plots (inaccessible terrain and the like) are never chosen.
    pub is_available: bool,
    /// Position in the zone's permanent plot sequence, if permanent.
    pub permanent_index: Option<u32>,
    pub size_meters: u32,
}

impl MonitoringPlot {
    /// An available, non-permanent plot of the standard size.
    pub fn new(id: PlotId, boundary: Polygon<f64>) -> Self {
        Self {
            id,
            boundary,
            is_available: true,
            permanent_index: None,
            size_meters: MONITORING_PLOT_SIZE as u32,
        }
    }

    pub fn with_permanent_index(mut self, index: u32) -> Self {
        self.permanent_index = Some(index);
        self
    }

    pub fn with_availability(mut self, is_available: bool) -> Self {
        self.is_available = is_available;
        self
    }

    pub fn with_size(mut self, size_meters: u32) -> Self {
        self.size_meters = size_meters;
        self
    }

    /// True if this is one of the first `num_permanent_plots` permanent plots.
    pub fn is_permanent_within(&self, num_permanent_plots: u32) -> bool {
        matches!(self.permanent_index, Some(index) if index <= num_permanent_plots)
    }
}

// ============================================================================
// Subdivisions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewSubdivision {
    pub name: String,
    pub boundary: Boundary,
}

impl NewSubdivision {
    pub fn new(name: impl Into<String>, boundary: Boundary) -> Self {
        Self {
            name: name.into(),
            boundary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingSubdivision {
    pub id: SubdivisionId,
    pub name: String,
    pub boundary: Boundary,
    pub monitoring_plots: Vec<MonitoringPlot>,
}

impl ExistingSubdivision {
    pub fn new(id: SubdivisionId, name: impl Into<String>, boundary: Boundary) -> Self {
        Self {
            id,
            name: name.into(),
            boundary,
            monitoring_plots: Vec::new(),
        }
    }

    pub fn with_plots(mut self, plots: Vec<MonitoringPlot>) -> Self {
        self.monitoring_plots = plots;
        self
    }

    /// Number of plots that are among the first `num_permanent_plots`
    /// permanent plots.
    pub fn count_permanent_within(&self, num_permanent_plots: u32) -> usize {
        self.monitoring_plots
            .iter()
            .filter(|plot| plot.is_permanent_within(num_permanent_plots))
            .count()
    }
}

// ============================================================================
// Zones
// ============================================================================

/// How many plots of each kind a zone needs per observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotCounts {
    pub num_permanent_plots: u32,
    pub num_temporary_plots: u32,
}

impl PlotCounts {
    pub fn new(num_permanent_plots: u32, num_temporary_plots: u32) -> Self {
        Self {
            num_permanent_plots,
            num_temporary_plots,
        }
    }

    /// Derive counts from the expected variance of planting density.
    ///
    /// `total = ⌈t² · variance / margin²⌉`, split into a permanent share
    /// (rounded, at least 1) and the rest as temporary (at least 1).
    pub fn from_statistics(config: &PlotCountConfig) -> Result<Self> {
        config.validate()?;

        let t = decimal(config.students_t, "students_t")?;
        let variance = decimal(config.variance, "variance")?;
        let margin = decimal(config.error_margin, "error_margin")?;
        let fraction = decimal(config.permanent_fraction, "permanent_fraction")?;

        let total = (&t * &t * variance / (&margin * &margin)).with_scale_round(0, RoundingMode::Up);
        let permanent = (&total * fraction).with_scale_round(0, RoundingMode::HalfUp);

        let total = to_count(&total)?;
        let permanent = to_count(&permanent)?.max(1);
        let temporary = total.saturating_sub(permanent).max(1);

        Ok(Self::new(permanent, temporary))
    }
}

impl Default for PlotCounts {
    fn default() -> Self {
        Self::new(8, 3)
    }
}

fn decimal(value: f64, name: &str) -> Result<BigDecimal> {
    // Go through the shortest decimal representation so 1.645 stays 1.645
    // instead of its binary expansion.
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| PlotError::InvalidConfig(format!("{} is not a number: {}", name, e)))
}

fn to_count(value: &BigDecimal) -> Result<u32> {
    value
        .to_u32()
        .ok_or_else(|| PlotError::InvalidConfig(format!("plot count {} out of range", value)))
}

/// A zone that hasn't been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewZone {
    pub name: String,
    pub boundary: Boundary,
    pub area_ha: BigDecimal,
    pub plot_counts: PlotCounts,
    pub subdivisions: Vec<NewSubdivision>,
}

impl NewZone {
    /// Create a zone, computing its usable area and deriving plot counts
    /// from `statistics`. Use [`with_plot_counts`](Self::with_plot_counts)
    /// to override them.
    pub fn create(
        name: impl Into<String>,
        boundary: Boundary,
        exclusion: Option<&MultiPolygon<f64>>,
        subdivisions: Vec<NewSubdivision>,
        statistics: &PlotCountConfig,
    ) -> Result<Self> {
        let area_ha = area_hectares(&boundary, exclusion)?;
        let plot_counts = PlotCounts::from_statistics(statistics)?;

        Ok(Self {
            name: name.into(),
            boundary,
            area_ha,
            plot_counts,
            subdivisions,
        })
    }

    pub fn with_plot_counts(mut self, plot_counts: PlotCounts) -> Self {
        self.plot_counts = plot_counts;
        self
    }
}

/// A stored zone with its subdivisions and their plots.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingZone {
    pub id: ZoneId,
    pub name: String,
    pub boundary: Boundary,
    /// `None` until an admin configures the zone's plot counts.
    pub plot_counts: Option<PlotCounts>,
    pub subdivisions: Vec<ExistingSubdivision>,
}

impl ExistingZone {
    pub fn new(
        id: ZoneId,
        name: impl Into<String>,
        boundary: Boundary,
        subdivisions: Vec<ExistingSubdivision>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            boundary,
            plot_counts: None,
            subdivisions,
        }
    }

    pub fn with_plot_counts(mut self, plot_counts: PlotCounts) -> Self {
        self.plot_counts = Some(plot_counts);
        self
    }

    /// The configured plot counts.
    pub fn plot_counts(&self) -> Result<PlotCounts> {
        self.plot_counts
            .ok_or_else(|| PlotError::PlotCountsUnconfigured(self.to_string()))
    }

    /// Every plot in every subdivision.
    pub fn plots(&self) -> impl Iterator<Item = &MonitoringPlot> {
        self.subdivisions
            .iter()
            .flat_map(|subdivision| subdivision.monitoring_plots.iter())
    }

    /// The subdivision containing the largest portion of a shape, or `None`
    /// if the shape doesn't overlap any subdivision.
    pub fn find_subdivision(&self, geometry: &MultiPolygon<f64>) -> Option<&ExistingSubdivision> {
        self.subdivisions
            .iter()
            .filter(|subdivision| subdivision.boundary.geometry().intersects(geometry))
            .map(|subdivision| {
                let overlap = subdivision
                    .boundary
                    .geometry()
                    .intersection(geometry)
                    .unsigned_area();
                (subdivision, overlap)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(subdivision, _)| subdivision)
    }

    /// The standard-size plot containing the center of a shape.
    pub fn find_monitoring_plot(&self, geometry: &Geometry<f64>) -> Option<&MonitoringPlot> {
        let center: Point<f64> = geometry.centroid()?;
        self.plots().find(|plot| {
            f64::from(plot.size_meters) == MONITORING_PLOT_SIZE && plot.boundary.contains(&center)
        })
    }

    pub fn find_subdivision_with_plot(&self, plot_id: PlotId) -> Option<&ExistingSubdivision> {
        self.subdivisions.iter().find(|subdivision| {
            subdivision
                .monitoring_plots
                .iter()
                .any(|plot| plot.id == plot_id)
        })
    }

    /// True if any plot in the zone has this permanent index.
    pub fn permanent_index_exists(&self, index: u32) -> bool {
        self.plots().any(|plot| plot.permanent_index == Some(index))
    }

    pub fn subdivision(&self, id: SubdivisionId) -> Option<&ExistingSubdivision> {
        self.subdivisions.iter().find(|subdivision| subdivision.id == id)
    }
}

impl fmt::Display for ExistingZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

// ============================================================================
// Sites
// ============================================================================

/// A site map that hasn't been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub name: String,
    pub boundary: Option<Boundary>,
    pub exclusion: Option<MultiPolygon<f64>>,
    /// Always in the boundary's CRS when there is a boundary.
    pub grid_origin: Option<GridOrigin>,
    /// Usable area, or `None` if there's no boundary or it rounds to zero.
    pub area_ha: Option<BigDecimal>,
    pub zones: Vec<NewZone>,
}

impl Site {
    /// Create a site, computing its usable area and settling its grid origin.
    ///
    /// The grid origin is reprojected into the boundary's CRS. Without one,
    /// the southwest corner of the boundary's envelope is used.
    pub fn create(
        name: impl Into<String>,
        boundary: Option<Boundary>,
        exclusion: Option<MultiPolygon<f64>>,
        grid_origin: Option<GridOrigin>,
        zones: Vec<NewZone>,
    ) -> Result<Self> {
        let area_ha = match &boundary {
            Some(boundary) => {
                let area = area_hectares(boundary, exclusion.as_ref())?;
                (!area.is_zero()).then_some(area)
            }
            None => None,
        };

        let grid_origin = match (&boundary, grid_origin) {
            (Some(boundary), Some(origin)) => Some(origin.to_srid(boundary.srid())?),
            (Some(boundary), None) => {
                let southwest = envelope_corners(&boundary.envelope()?)[0];
                Some(GridOrigin::new(southwest.into(), boundary.srid()))
            }
            (None, origin) => origin,
        };

        let site = Self {
            name: name.into(),
            boundary,
            exclusion,
            grid_origin,
            area_ha,
            zones,
        };

        tracing::debug!(
            site = %site.name,
            area_ha = ?site.area_ha,
            zones = site.zones.len(),
            "Site created"
        );

        Ok(site)
    }
}
