//! Conversion of resolution entries into a capacity-bounded routing table.

use std::fmt;

use hce_types::{
    AidMatchingMode, AidQualifier, ControllerCapabilities, ExecutionLocation, HandlerClaim,
    ResolveEntry, Route, RoutingRow, SecureElementRef,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, RoutingError};
use crate::options::RoutingOptions;
use crate::power::compute_power_state;

/// One row per routable entry, before the global default route is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub rows: Vec<RoutingRow>,
    /// Some routed handler only works with the screen on.
    pub requires_screen_on_exists: bool,
}

/// A routing table ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedTable {
    pub default_route: Route,
    /// Explicit rows; rows implied by the default route are left out.
    pub rows: Vec<RoutingRow>,
}

impl PackedTable {
    pub fn empty(default_route: Route) -> Self {
        Self {
            default_route,
            rows: Vec::new(),
        }
    }

    /// Encoded size in controller table bytes.
    pub fn cost(&self) -> usize {
        self.rows.iter().map(RoutingRow::cost).sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cost());
        for row in &self.rows {
            row.encode(&mut out);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for PackedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "default route: {}", self.default_route)?;
        for row in &self.rows {
            writeln!(f, "  {}", row)?;
        }
        Ok(())
    }
}

pub struct RoutingTablePacker<'a> {
    caps: &'a ControllerCapabilities,
    options: &'a RoutingOptions,
}

impl<'a> RoutingTablePacker<'a> {
    pub fn new(caps: &'a ControllerCapabilities, options: &'a RoutingOptions) -> Self {
        Self { caps, options }
    }

    /// Compute a row for every entry that must be routed.
    pub fn plan<'e, I>(&self, entries: I) -> RoutingPlan
    where
        I: IntoIterator<Item = &'e ResolveEntry>,
    {
        let mut plan = RoutingPlan::default();
        for entry in entries {
            if !entry.must_route {
                trace!(aid = %entry.aid, "Not routing AID on request");
                continue;
            }
            if let Some(row) = self.row_for(entry, &mut plan.requires_screen_on_exists) {
                plan.rows.push(row);
            }
        }
        plan
    }

    fn row_for(&self, entry: &ResolveEntry, screen_on_exists: &mut bool) -> Option<RoutingRow> {
        let nci = self.caps.nci_version;
        let (route, power) = match (entry.default_claim(), entry.candidates()) {
            (_, []) => return None,
            (Some(default), _) => {
                *screen_on_exists |= default.requires_screen_on;
                (
                    self.caps.route_for(&default.location),
                    compute_power_state(
                        default.is_on_host(),
                        default.requires_screen_on,
                        default.requires_unlock,
                        nci,
                    ),
                )
            }
            // A lone candidate that is not the default still needs the host
            // so the user can confirm it.
            (None, [only]) => {
                *screen_on_exists |= only.requires_screen_on;
                (
                    Route::Host,
                    compute_power_state(true, only.requires_screen_on, only.requires_unlock, nci),
                )
            }
            (None, candidates) => {
                *screen_on_exists |= candidates.iter().any(|c| c.requires_screen_on);
                match common_off_host(candidates) {
                    Some((se, screen_on, unlock)) => (
                        self.caps.route_for(&ExecutionLocation::OffHost(se.clone())),
                        compute_power_state(false, screen_on, unlock, nci),
                    ),
                    None => (Route::Host, compute_power_state(true, true, false, nci)),
                }
            }
        };

        let mut qualifier = AidQualifier::for_kind(entry.aid.kind());
        if entry
            .prefix_conflict
            .as_ref()
            .is_some_and(|c| c.matching_subset)
        {
            qualifier.prefix = true;
        }
        Some(RoutingRow {
            aid: entry.aid.clone(),
            route,
            power,
            qualifier,
        })
    }

    /// Drop rows implied by `default_route`.
    ///
    /// Prefix-only controllers treat every row as a prefix, so a default-route
    /// AID that extends a row going elsewhere is kept, ahead of everything else.
    pub fn fit(&self, plan: &RoutingPlan, default_route: Route) -> PackedTable {
        let prefix_only = self.caps.matching_mode == AidMatchingMode::PrefixOnly;
        let mut pinned = Vec::new();
        let mut rows = Vec::new();
        for row in &plan.rows {
            if row.route != default_route {
                rows.push(row.clone());
                continue;
            }
            let shadowed = prefix_only
                && plan.rows.iter().any(|other| {
                    other.route != default_route && row.aid.digits().starts_with(other.aid.digits())
                });
            if shadowed {
                debug!(
                    aid = %row.aid,
                    "Adding default-route AID ahead of a conflicting shorter AID"
                );
                pinned.push(row.clone());
            }
        }
        pinned.extend(rows);
        PackedTable {
            default_route,
            rows: pinned,
        }
    }

    /// Fit the plan under the first default route of the try-list that stays
    /// within capacity.
    pub fn pack(&self, plan: &RoutingPlan) -> Result<PackedTable> {
        let capacity = self.caps.max_routing_table_size;
        let mut smallest = usize::MAX;
        for route in self.options.try_list(self.caps) {
            let table = self.fit(plan, route);
            let cost = table.cost();
            if cost <= capacity {
                debug!(default_route = %route, rows = table.len(), cost, capacity, "Routing table fits");
                return Ok(table);
            }
            debug!(default_route = %route, cost, capacity, "Routing table does not fit");
            smallest = smallest.min(cost);
        }
        Err(RoutingError::Overflow {
            required: smallest,
            capacity,
        })
    }
}

/// The secure element and power profile shared by every candidate, if any.
fn common_off_host(candidates: &[HandlerClaim]) -> Option<(&SecureElementRef, bool, bool)> {
    let (first, rest) = candidates.split_first()?;
    let se = first.location.secure_element()?;
    let profile = (first.requires_screen_on, first.requires_unlock);
    for claim in rest {
        if claim.location.secure_element() != Some(se) {
            return None;
        }
        if (claim.requires_screen_on, claim.requires_unlock) != profile {
            return None;
        }
    }
    Some((se, profile.0, profile.1))
}
