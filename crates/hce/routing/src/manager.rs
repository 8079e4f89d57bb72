//! Keeps the controller's AID routing table in sync with the resolution cache.

use std::sync::Arc;

use hce_types::{ControllerCapabilities, ResolveEntry, Route};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controller::NfcController;
use crate::error::RoutingError;
use crate::options::RoutingOptions;
use crate::packer::{PackedTable, RoutingPlan, RoutingTablePacker};

/// Result of one routing update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoutingOutcome {
    Committed {
        default_route: Route,
        rows: usize,
        bytes: usize,
    },
    Unchanged,
    /// Nothing fits; the previous table stays in place.
    Overflow {
        required: usize,
        capacity: usize,
        /// False when the same overflow was already reported.
        first_report: bool,
    },
    Rejected { reason: String },
    /// The controller is off; nothing was committed.
    Disabled,
}

pub struct AidRoutingManager {
    caps: ControllerCapabilities,
    options: RoutingOptions,
    controller: Arc<dyn NfcController>,
    enabled: bool,
    committed: Option<PackedTable>,
    last_overflow: Option<RoutingPlan>,
    requires_screen_on_exists: bool,
}

impl AidRoutingManager {
    pub fn new(
        caps: ControllerCapabilities,
        options: RoutingOptions,
        controller: Arc<dyn NfcController>,
    ) -> Self {
        debug!(
            matching_mode = ?caps.matching_mode,
            default_route = %caps.default_route,
            capacity = caps.max_routing_table_size,
            "AID routing manager created"
        );
        Self {
            caps,
            options,
            controller,
            enabled: true,
            committed: None,
            last_overflow: None,
            requires_screen_on_exists: false,
        }
    }

    pub fn capabilities(&self) -> &ControllerCapabilities {
        &self.caps
    }

    pub fn options(&self) -> &RoutingOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn committed(&self) -> Option<&PackedTable> {
        self.committed.as_ref()
    }

    pub fn requires_screen_on_exists(&self) -> bool {
        self.requires_screen_on_exists
    }

    /// Pack the entries and commit them unless the result equals the last commit.
    pub fn update<'e, I>(&mut self, entries: I, force: bool) -> RoutingOutcome
    where
        I: IntoIterator<Item = &'e ResolveEntry>,
    {
        if !self.enabled {
            debug!("Not updating routing table because the controller is off");
            return RoutingOutcome::Disabled;
        }

        let packer = RoutingTablePacker::new(&self.caps, &self.options);
        let plan = packer.plan(entries);
        self.requires_screen_on_exists = plan.requires_screen_on_exists;

        let table = match packer.pack(&plan) {
            Ok(table) => table,
            Err(RoutingError::Overflow { required, capacity }) => {
                return self.overflow(plan, required, capacity);
            }
            Err(e) => {
                return RoutingOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };
        self.last_overflow = None;

        if !force && self.committed.as_ref() == Some(&table) {
            debug!("Routing table unchanged, not updating");
            return RoutingOutcome::Unchanged;
        }

        if let Err(e) = self.controller.commit_routing(&table) {
            return match e {
                RoutingError::Overflow { required, capacity } => {
                    self.overflow(plan, required, capacity)
                }
                other => {
                    warn!(error = %other, "Routing commit failed, keeping previous table");
                    RoutingOutcome::Rejected {
                        reason: other.to_string(),
                    }
                }
            };
        }

        info!(
            default_route = %table.default_route,
            rows = table.len(),
            bytes = table.cost(),
            "Routing table committed"
        );
        let outcome = RoutingOutcome::Committed {
            default_route: table.default_route,
            rows: table.len(),
            bytes: table.cost(),
        };
        self.committed = Some(table);
        outcome
    }

    fn overflow(&mut self, plan: RoutingPlan, required: usize, capacity: usize) -> RoutingOutcome {
        let first_report = self.last_overflow.as_ref() != Some(&plan);
        if first_report {
            warn!(required, capacity, "Routing table overflow, keeping previous table");
        }
        self.last_overflow = Some(plan);
        RoutingOutcome::Overflow {
            required,
            capacity,
            first_report,
        }
    }

    /// Replace the routing options. Returns true when the next update should be forced.
    pub fn set_options(&mut self, options: RoutingOptions) -> bool {
        if self.options == options {
            return false;
        }
        info!(default_route_override = ?options.default_route_override, "Routing options changed");
        self.options = options;
        true
    }

    pub fn on_controller_enabled(&mut self) {
        self.enabled = true;
        self.committed = None;
    }

    pub fn on_controller_disabled(&mut self) {
        self.enabled = false;
        if let Err(e) = self.controller.clear_routing() {
            warn!(error = %e, "Failed to clear routing table");
        }
        self.committed = None;
        self.last_overflow = None;
    }

    /// The controller dropped its table on its own; forget what we committed.
    pub fn on_routing_table_cleared(&mut self) {
        self.committed = None;
    }

    pub fn dump(&self) -> Vec<String> {
        let mut out = vec![format!("default route: {}", self.caps.default_route)];
        match &self.committed {
            Some(table) => {
                out.push(format!("committed default route: {}", table.default_route));
                out.extend(table.rows.iter().map(|row| format!("  {}", row)));
            }
            None => out.push("nothing committed".to_string()),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockController;
    use hce_types::{
        Aid, Category, HandlerClaim, HandlerId, HandlerInfo, NfceeId, SecureElementRef, UserId,
    };

    fn entries() -> Vec<ResolveEntry> {
        let se = HandlerInfo::new(HandlerId::new("com.se", "Se"), UserId(0)).off_host("eSE1");
        let aid = Aid::parse("A0000000030101").unwrap();
        let mut entry = ResolveEntry::empty(aid.clone());
        entry.push_candidate(HandlerClaim::from_handler(&se, aid, Category::Other));
        entry.set_default(&se.handler_ref());
        vec![entry]
    }

    fn manager(capacity: usize) -> (AidRoutingManager, Arc<MockController>) {
        let mut caps = ControllerCapabilities::default();
        caps.max_routing_table_size = capacity;
        caps.off_host_routes
            .insert(SecureElementRef::new("eSE1"), Route::Nfcee(NfceeId(0x82)));
        let controller = Arc::new(MockController::new());
        let manager = AidRoutingManager::new(caps, RoutingOptions::default(), controller.clone());
        (manager, controller)
    }

    #[test]
    fn test_commit_then_unchanged() {
        let (mut manager, controller) = manager(256);
        let entries = entries();
        assert!(matches!(
            manager.update(&entries, false),
            RoutingOutcome::Committed { rows: 1, .. }
        ));
        assert_eq!(manager.update(&entries, false), RoutingOutcome::Unchanged);
        assert!(matches!(
            manager.update(&entries, true),
            RoutingOutcome::Committed { .. }
        ));
        assert_eq!(controller.commits().len(), 2);
    }

    #[test]
    fn test_overflow_keeps_previous_table_and_reports_once() {
        let (mut manager, controller) = manager(256);
        manager.update(&entries(), false);
        let before = manager.committed().cloned();

        manager.caps.max_routing_table_size = 4;
        let outcome = manager.update(&entries(), false);
        assert!(matches!(
            outcome,
            RoutingOutcome::Overflow {
                first_report: true,
                ..
            }
        ));
        let outcome = manager.update(&entries(), false);
        assert!(matches!(
            outcome,
            RoutingOutcome::Overflow {
                first_report: false,
                ..
            }
        ));
        assert_eq!(manager.committed().cloned(), before);
        assert_eq!(controller.commits().len(), 1);
    }

    #[test]
    fn test_disabled_controller_skips_commit() {
        let (mut manager, controller) = manager(256);
        manager.update(&entries(), false);
        manager.on_controller_disabled();
        assert_eq!(controller.clear_count(), 1);
        assert_eq!(manager.update(&entries(), false), RoutingOutcome::Disabled);
        assert!(manager.committed().is_none());

        manager.on_controller_enabled();
        assert!(matches!(
            manager.update(&entries(), false),
            RoutingOutcome::Committed { .. }
        ));
    }

    #[test]
    fn test_controller_rejection_keeps_previous() {
        let (mut manager, controller) = manager(256);
        controller.fail_next_commit(RoutingError::Rejected("busy".into()));
        assert!(matches!(
            manager.update(&entries(), false),
            RoutingOutcome::Rejected { .. }
        ));
        assert!(manager.committed().is_none());
    }

    #[test]
    fn test_cleared_table_forces_recommit() {
        let (mut manager, controller) = manager(256);
        manager.update(&entries(), false);
        manager.on_routing_table_cleared();
        assert!(matches!(
            manager.update(&entries(), false),
            RoutingOutcome::Committed { .. }
        ));
        assert_eq!(controller.commits().len(), 2);
    }
}
