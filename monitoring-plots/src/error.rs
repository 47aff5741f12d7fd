//! Error types for plot placement and allocation.

use crate::model::SubdivisionId;
use thiserror::Error;

/// Plot placement errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlotError {
    /// WKT parsing error.
    #[error("WKT parse error: {0}")]
    WktParse(String),

    /// Invalid geometry (empty, non-finite coordinates, zero area).
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The SRID doesn't name a coordinate reference system we can resolve.
    #[error("Unsupported coordinate reference system: EPSG:{0}")]
    UnsupportedCrs(u32),

    /// Two geometries that must share a CRS don't.
    #[error("CRS mismatch: expected EPSG:{expected} but got EPSG:{actual}")]
    CrsMismatch { expected: u32, actual: u32 },

    /// A zone has no subdivisions to allocate plots to.
    #[error("No subdivisions found for zone {0}")]
    NoSubdivisions(String),

    /// Plot counts haven't been configured for a zone.
    #[error("Plot counts not configured for zone {0}")]
    PlotCountsUnconfigured(String),

    /// Invalid argument combination, rejected before any geometry work.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Quadrant search recursed past the configured depth limit.
    #[error("Square search exceeded maximum depth {max_depth}")]
    SearchLimitExceeded { max_depth: u32 },

    /// A subdivision doesn't have room for the number of plots it was assigned.
    #[error(
        "Subdivision {subdivision_id} is full: needed {plots_needed} plots but only \
         {plots_available} available"
    )]
    SubdivisionFull {
        subdivision_id: SubdivisionId,
        plots_needed: usize,
        plots_available: usize,
    },
}

impl PlotError {
    /// True for capacity shortfalls: the area genuinely lacks room, so the
    /// caller may shrink the request or accept a partial allocation.
    pub fn is_capacity(&self) -> bool {
        matches!(self, PlotError::SubdivisionFull { .. })
    }

    /// True for configuration and geometry errors that can't succeed until
    /// the inputs are fixed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlotError::WktParse(_)
                | PlotError::InvalidGeometry(_)
                | PlotError::UnsupportedCrs(_)
                | PlotError::CrsMismatch { .. }
                | PlotError::NoSubdivisions(_)
                | PlotError::PlotCountsUnconfigured(_)
                | PlotError::InvalidConfig(_)
                | PlotError::SearchLimitExceeded { .. }
        )
    }
}

/// Result type for plot operations.
pub type Result<T> = std::result::Result<T, PlotError>;
