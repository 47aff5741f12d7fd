//! Grid-aligned monitoring plot placement for planting sites.
//!
//! Chooses where field teams measure survival and growth: square plots of a
//! fixed size, aligned to a grid anchored at a site-specific origin, spread
//! fairly across the subdivisions of a zone and kept out of exclusion areas
//! and existing plots.
//!
//! # Architecture
//!
//! ```text
//!            Site / NewZone ──► validation
//!                                   │
//! ExistingZone ──► PlotAllocator ───┤
//!                        │          │
//!                        ▼          ▼
//!               UnusedSquareFinder (random probes, weighted quadrants)
//!                        │
//!                        ▼
//!               CoordinateMapper (geodesic meter offsets)
//!                        │
//!                        ▼
//!                       Crs ◄──── area_hectares
//! ```
//!
//! Everything is synchronous and deterministic given the injected random
//! number generator; pass a seeded `StdRng` to reproduce a placement.
//!
//! # Modules
//!
//! - [`config`]: Search, plot count and validation tunables
//! - [`crs`]: Coordinate reference systems and reprojection
//! - [`geometry`]: Boundaries, grid origins, WKT parsing, overlay helpers
//! - [`mapper`]: Meter offsets from the grid origin
//! - [`square_finder`]: Grid-aligned square search
//! - [`allocator`]: Permanent and temporary plot selection
//! - [`area`]: Areas in hectares
//! - [`model`]: Sites, zones, subdivisions and plots
//! - [`validation`]: Site map validation
//! - [`error`]: Error types

pub mod allocator;
pub mod area;
pub mod config;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod mapper;
pub mod model;
pub mod square_finder;
pub mod validation;

// Re-export key types
pub use allocator::{AllocationRequest, FindSquaresOptions, PlotAllocator, PlotAssignment};
pub use area::{area_hectares, envelope_area_hectares, HECTARES_SCALE};
pub use config::{PlotCountConfig, SiteLimits, SquareSearchConfig, MONITORING_PLOT_SIZE};
pub use crs::Crs;
pub use error::{PlotError, Result};
pub use geometry::{parse_multi_polygon, parse_wkt, Boundary, GridOrigin};
pub use mapper::{snap_to_grid, CoordinateMapper};
pub use model::{
    ExistingSubdivision, ExistingZone, MonitoringPlot, NewSubdivision, NewZone, PlotCounts, PlotId,
    Site, SubdivisionId, ZoneId,
};
pub use square_finder::UnusedSquareFinder;
pub use validation::ValidationFailure;
