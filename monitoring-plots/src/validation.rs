//! Site map validation.
//!
//! Checks a new site's zones and subdivisions for problems that would stop
//! monitoring plots from being placed: regions outside their parents,
//! overlapping siblings, duplicate names, and zones too small to hold a
//! permanent and a temporary plot.
//!
//! All problems are collected rather than stopping at the first, so a site
//! map can be fixed in one pass. Errors are reserved for inputs that can't
//! be checked at all (unsupported CRS, mismatched SRIDs).

use crate::area::envelope_area_hectares;
use crate::config::{SiteLimits, SquareSearchConfig};
use crate::error::{PlotError, Result};
use crate::geometry::{coverage_percent, envelope_corners, nearly_covered_by, Boundary, GridOrigin};
use crate::model::{NewZone, Site};
use crate::square_finder::UnusedSquareFinder;
use num_traits::ToPrimitive;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A problem with a site map.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("Site boundary's envelope is too large")]
    SiteTooLarge,

    #[error("Zone name {zone} appears more than once")]
    DuplicateZoneName { zone: String },

    #[error("Zone {zone} is not inside the site")]
    ZoneNotInSite { zone: String },

    #[error("Zone {zone} overlaps {conflicts_with:?}")]
    ZoneBoundaryOverlaps {
        zone: String,
        conflicts_with: BTreeSet<String>,
    },

    #[error("Site has an exclusion area but no boundary")]
    ExclusionWithoutBoundary,

    #[error("Site has zones but no boundary")]
    ZonesWithoutSiteBoundary,

    #[error("Zone {zone} is too small to hold a permanent and a temporary plot")]
    ZoneTooSmall { zone: String },

    #[error("Zone {zone} has no subdivisions")]
    ZoneHasNoSubdivisions { zone: String },

    #[error("Subdivision name {subdivision} appears more than once in zone {zone}")]
    DuplicateSubdivisionName { subdivision: String, zone: String },

    #[error("Subdivision {subdivision} is not inside zone {zone}")]
    SubdivisionNotInZone { subdivision: String, zone: String },

    #[error("Subdivision {subdivision} in zone {zone} is inside the exclusion area")]
    SubdivisionInExclusionArea { subdivision: String, zone: String },

    #[error("Subdivision {subdivision} in zone {zone} overlaps {conflicts_with:?}")]
    SubdivisionBoundaryOverlaps {
        subdivision: String,
        zone: String,
        conflicts_with: BTreeSet<String>,
    },
}

impl Site {
    /// Check the site map, returning every problem found.
    pub fn validate<R: Rng + ?Sized>(
        &self,
        limits: &SiteLimits,
        search: &SquareSearchConfig,
        rng: &mut R,
    ) -> Result<Vec<ValidationFailure>> {
        let _span = tracing::debug_span!("validate_site", site = %self.name).entered();
        let mut problems = Vec::new();

        let Some(boundary) = &self.boundary else {
            if self.exclusion.is_some() {
                problems.push(ValidationFailure::ExclusionWithoutBoundary);
            }
            if !self.zones.is_empty() {
                problems.push(ValidationFailure::ZonesWithoutSiteBoundary);
            }
            return Ok(problems);
        };

        let envelope_ha = envelope_area_hectares(boundary)?;
        if envelope_ha.to_f64().unwrap_or(f64::INFINITY) > limits.max_envelope_area_ha {
            problems.push(ValidationFailure::SiteTooLarge);
        }

        for zone in duplicates(self.zones.iter().map(|z| z.name.as_str())) {
            problems.push(ValidationFailure::DuplicateZoneName { zone });
        }

        let grid_origin = self.grid_origin_for(boundary)?;

        for (index, zone) in self.zones.iter().enumerate() {
            require_same_srid(boundary, &zone.boundary)?;

            if !nearly_covered_by(
                zone.boundary.geometry(),
                boundary.geometry(),
                search.coverage_percent,
            ) {
                problems.push(ValidationFailure::ZoneNotInSite {
                    zone: zone.name.clone(),
                });
            }

            for other in &self.zones[index + 1..] {
                let overlap = coverage_percent(zone.boundary.geometry(), other.boundary.geometry());
                if overlap > limits.region_overlap_max_percent {
                    problems.push(ValidationFailure::ZoneBoundaryOverlaps {
                        zone: zone.name.clone(),
                        conflicts_with: BTreeSet::from([other.name.clone()]),
                    });
                }
            }

            problems.extend(zone.validate(self, &grid_origin, limits, search, rng)?);
        }

        tracing::debug!(problems = problems.len(), "Site validated");
        Ok(problems)
    }

    /// The stored grid origin in the boundary's CRS, or the boundary's
    /// southwest corner if there isn't one.
    fn grid_origin_for(&self, boundary: &Boundary) -> Result<GridOrigin> {
        match &self.grid_origin {
            Some(origin) => origin.to_srid(boundary.srid()),
            None => {
                let southwest = envelope_corners(&boundary.envelope()?)[0];
                Ok(GridOrigin::new(southwest.into(), boundary.srid()))
            }
        }
    }
}

impl NewZone {
    /// Check the zone and its subdivisions against the rest of the site.
    pub fn validate<R: Rng + ?Sized>(
        &self,
        site: &Site,
        grid_origin: &GridOrigin,
        limits: &SiteLimits,
        search: &SquareSearchConfig,
        rng: &mut R,
    ) -> Result<Vec<ValidationFailure>> {
        let mut problems = Vec::new();

        // One square for a permanent plot and one for a temporary plot.
        let finder = UnusedSquareFinder::new(
            &self.boundary,
            grid_origin,
            site.exclusion.as_ref(),
            search,
        )?;
        if finder.find_unused_squares(2, rng)?.len() < 2 {
            problems.push(ValidationFailure::ZoneTooSmall {
                zone: self.name.clone(),
            });
        }

        for subdivision in duplicates(self.subdivisions.iter().map(|s| s.name.as_str())) {
            problems.push(ValidationFailure::DuplicateSubdivisionName {
                subdivision,
                zone: self.name.clone(),
            });
        }

        if self.subdivisions.is_empty() {
            problems.push(ValidationFailure::ZoneHasNoSubdivisions {
                zone: self.name.clone(),
            });
        }

        for (index, subdivision) in self.subdivisions.iter().enumerate() {
            require_same_srid(&self.boundary, &subdivision.boundary)?;
            let geometry = subdivision.boundary.geometry();

            if !nearly_covered_by(geometry, self.boundary.geometry(), search.coverage_percent) {
                problems.push(ValidationFailure::SubdivisionNotInZone {
                    subdivision: subdivision.name.clone(),
                    zone: self.name.clone(),
                });
            }

            if let Some(exclusion) = &site.exclusion {
                if nearly_covered_by(geometry, exclusion, search.coverage_percent) {
                    problems.push(ValidationFailure::SubdivisionInExclusionArea {
                        subdivision: subdivision.name.clone(),
                        zone: self.name.clone(),
                    });
                }
            }

            for other in &self.subdivisions[index + 1..] {
                let overlap = coverage_percent(geometry, other.boundary.geometry());
                if overlap > limits.region_overlap_max_percent {
                    problems.push(ValidationFailure::SubdivisionBoundaryOverlaps {
                        subdivision: subdivision.name.clone(),
                        zone: self.name.clone(),
                        conflicts_with: BTreeSet::from([other.name.clone()]),
                    });
                }
            }
        }

        Ok(problems)
    }
}

/// Names that appear more than once, compared case-insensitively. Reports
/// the first spelling of each.
fn duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut groups: BTreeMap<String, (String, usize)> = BTreeMap::new();
    for name in names {
        groups
            .entry(name.to_lowercase())
            .or_insert_with(|| (name.to_string(), 0))
            .1 += 1;
    }
    groups
        .into_values()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect()
}

fn require_same_srid(parent: &Boundary, child: &Boundary) -> Result<()> {
    if parent.srid() != child.srid() {
        return Err(PlotError::CrsMismatch {
            expected: parent.srid(),
            actual: child.srid(),
        });
    }
    Ok(())
}
