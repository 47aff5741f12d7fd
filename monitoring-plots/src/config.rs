//! Plot placement configuration types.
//!
//! Defines the tunables for the square search, the statistical parameters
//! used to derive default plot counts, and the limits applied when
//! validating a site map.

use crate::error::{PlotError, Result};
use serde::{Deserialize, Serialize};

/// Side length of a standard monitoring plot, in meters.
pub const MONITORING_PLOT_SIZE: f64 = 30.0;

/// Configuration for the grid-aligned square search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquareSearchConfig {
    /// Length of each side of a square, in meters. Also the grid interval.
    /// Default: 30
    pub plot_size_meters: f64,

    /// Minimum percentage of a candidate square that must be covered by the
    /// usable area. Slightly below 100 so projection and float rounding on
    /// axis-aligned edges don't reject squares that are really inside.
    /// Default: 99.999
    pub coverage_percent: f64,

    /// Random probes per region before falling back to quadrant subdivision.
    /// Default: 5
    pub max_random_attempts: u32,

    /// Maximum quadrant recursion depth.
    /// Default: 40
    pub max_depth: u32,
}

impl Default for SquareSearchConfig {
    fn default() -> Self {
        Self {
            plot_size_meters: MONITORING_PLOT_SIZE,
            coverage_percent: 99.999,
            max_random_attempts: 5,
            max_depth: 40,
        }
    }
}

impl SquareSearchConfig {
    /// Set the plot size in meters.
    pub fn with_plot_size(mut self, plot_size_meters: f64) -> Self {
        self.plot_size_meters = plot_size_meters;
        self
    }

    /// Set the maximum recursion depth.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the number of random probes per region.
    pub fn with_max_random_attempts(mut self, attempts: u32) -> Self {
        self.max_random_attempts = attempts;
        self
    }

    /// Check that the values describe a usable search.
    pub fn validate(&self) -> Result<()> {
        if !self.plot_size_meters.is_finite() || self.plot_size_meters <= 0.0 {
            return Err(PlotError::InvalidConfig(format!(
                "plot_size_meters must be positive, got {}",
                self.plot_size_meters
            )));
        }
        if !(self.coverage_percent > 0.0 && self.coverage_percent <= 100.0) {
            return Err(PlotError::InvalidConfig(format!(
                "coverage_percent must be in (0, 100], got {}",
                self.coverage_percent
            )));
        }
        if self.max_depth == 0 {
            return Err(PlotError::InvalidConfig("max_depth must be > 0".into()));
        }
        Ok(())
    }
}

/// Statistical parameters that determine how many monitoring plots a zone
/// needs per observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotCountConfig {
    /// Acceptable error margin, in plants per hectare.
    /// Default: 100
    pub error_margin: f64,

    /// Student's t value for a 90% confidence level.
    /// Default: 1.645
    pub students_t: f64,

    /// Expected variance of planting density.
    /// Default: 40000
    pub variance: f64,

    /// Share of the total plot count that is permanent.
    /// Default: 0.75
    pub permanent_fraction: f64,
}

impl Default for PlotCountConfig {
    fn default() -> Self {
        Self {
            error_margin: 100.0,
            students_t: 1.645,
            variance: 40000.0,
            permanent_fraction: 0.75,
        }
    }
}

impl PlotCountConfig {
    /// Set the error margin.
    pub fn with_error_margin(mut self, error_margin: f64) -> Self {
        self.error_margin = error_margin;
        self
    }

    /// Set the variance.
    pub fn with_variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.error_margin > 0.0) {
            return Err(PlotError::InvalidConfig(
                "error_margin must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.permanent_fraction) {
            return Err(PlotError::InvalidConfig(
                "permanent_fraction must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}

/// Limits applied by site map validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteLimits {
    /// Maximum area of the site boundary's envelope, in hectares.
    /// Default: 20000
    pub max_envelope_area_ha: f64,

    /// Percentage of a zone or subdivision that may overlap a sibling
    /// before the overlap is reported. Non-zero to absorb float error.
    /// Default: 0.01
    pub region_overlap_max_percent: f64,
}

impl Default for SiteLimits {
    fn default() -> Self {
        Self {
            max_envelope_area_ha: 20000.0,
            region_overlap_max_percent: 0.01,
        }
    }
}
