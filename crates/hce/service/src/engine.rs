//! The resolution lock domain.
//!
//! One mutex guards the handler sets, scopes, preferences and both routing
//! managers. Every rebuild publishes a fresh [`ResolutionSnapshot`]; readers
//! clone the `Arc` and never see a half-built index.

use std::collections::BTreeMap;
use std::sync::Arc;

use hce_resolver::{PreferredHandlers, ResolutionSnapshot, ScopeTable};
use hce_routing::{
    AidRoutingManager, NfcController, RoutingOptions, RoutingOutcome, SystemCodeRoutingManager,
};
use hce_types::{Aid, AidGroup, ControllerCapabilities, HandlerInfo, HandlerRef, ResolveEntry, UserId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::EngineListener;

/// What one rebuild did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub version: u64,
    pub routing: RoutingOutcome,
    /// NFC-F identifiers were registered or removed.
    pub t3t_changed: bool,
}

struct ResolutionState {
    sets: BTreeMap<UserId, Vec<HandlerInfo>>,
    scopes: ScopeTable,
    preferences: PreferredHandlers,
    /// Dynamic groups survive a re-push of the handler list.
    dynamic: BTreeMap<HandlerRef, Vec<AidGroup>>,
    routing: AidRoutingManager,
    system_codes: SystemCodeRoutingManager,
    version: u64,
    /// A staged change needs the next rebuild to commit even an unchanged table.
    force_pending: bool,
}

impl ResolutionState {
    fn apply_dynamic(&mut self) {
        for handlers in self.sets.values_mut() {
            for info in handlers.iter_mut() {
                info.dynamic_aid_groups = self
                    .dynamic
                    .get(&info.handler_ref())
                    .cloned()
                    .unwrap_or_default();
            }
        }
    }
}

pub struct ResolutionEngine {
    state: Mutex<ResolutionState>,
    snapshot: RwLock<Arc<ResolutionSnapshot>>,
    listener: Arc<dyn EngineListener>,
}

impl ResolutionEngine {
    pub fn new(
        caps: ControllerCapabilities,
        options: RoutingOptions,
        controller: Arc<dyn NfcController>,
        listener: Arc<dyn EngineListener>,
    ) -> Self {
        let state = ResolutionState {
            sets: BTreeMap::new(),
            scopes: ScopeTable::new(UserId::default()),
            preferences: PreferredHandlers::new(),
            dynamic: BTreeMap::new(),
            routing: AidRoutingManager::new(caps, options, controller.clone()),
            system_codes: SystemCodeRoutingManager::new(controller),
            version: 0,
            force_pending: false,
        };
        Self {
            state: Mutex::new(state),
            snapshot: RwLock::new(Arc::new(ResolutionSnapshot::default())),
            listener,
        }
    }

    /// The current snapshot. Cheap; the read lock is released on return.
    pub fn snapshot(&self) -> Arc<ResolutionSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn resolve(&self, aid: &Aid) -> ResolveEntry {
        self.snapshot().resolve(aid)
    }

    pub fn current_user(&self) -> UserId {
        self.state.lock().scopes.current()
    }

    pub fn preferences(&self) -> PreferredHandlers {
        self.state.lock().preferences.clone()
    }

    /// Replace the handler list of `user` without rebuilding.
    pub fn stage_handlers(&self, user: UserId, handlers: Vec<HandlerInfo>) {
        let mut state = self.state.lock();
        debug!(user = %user, count = handlers.len(), "Handler set staged");
        state.sets.insert(user, handlers);
        state.apply_dynamic();
    }

    pub fn set_handlers(&self, user: UserId, handlers: Vec<HandlerInfo>) -> RebuildReport {
        self.stage_handlers(user, handlers);
        self.rebuild(false)
    }

    /// Replace the dynamic groups of one handler; an empty list removes them.
    pub fn set_dynamic_aids(&self, handler: &HandlerRef, groups: Vec<AidGroup>) -> RebuildReport {
        let mut state = self.state.lock();
        if groups.is_empty() {
            state.dynamic.remove(handler);
        } else {
            state.dynamic.insert(handler.clone(), groups);
        }
        state.apply_dynamic();
        self.rebuild_locked(&mut state, false)
    }

    pub fn set_profile_parent(&self, profile: UserId, parent: UserId) -> RebuildReport {
        let mut state = self.state.lock();
        state.scopes.set_profile_parent(profile, parent);
        self.rebuild_locked(&mut state, false)
    }

    /// Make `user` current, dropping the session preferences of the previous one.
    pub fn switch_user(&self, user: UserId, payment_default: Option<HandlerRef>) -> RebuildReport {
        let mut state = self.state.lock();
        Self::switch_user_locked(&mut state, user, payment_default);
        self.rebuild_locked(&mut state, false)
    }

    /// [`ResolutionEngine::switch_user`] without the rebuild.
    pub fn stage_user_switch(&self, user: UserId, payment_default: Option<HandlerRef>) {
        Self::switch_user_locked(&mut self.state.lock(), user, payment_default);
    }

    fn switch_user_locked(
        state: &mut ResolutionState,
        user: UserId,
        payment_default: Option<HandlerRef>,
    ) {
        let previous = state.scopes.current();
        info!(from = %previous, to = %user, "Switching user");
        state.preferences.clear_user(previous);
        state.preferences.set_payment_default(payment_default);
        state.scopes.set_current(user);
    }

    /// Apply a preference mutation; rebuilds only when it reported a change.
    pub fn update_preferences<F>(&self, update: F) -> Option<RebuildReport>
    where
        F: FnOnce(&mut PreferredHandlers) -> bool,
    {
        let mut state = self.state.lock();
        if !update(&mut state.preferences) {
            return None;
        }
        Some(self.rebuild_locked(&mut state, false))
    }

    /// Apply a preference mutation without rebuilding; true when it changed anything.
    pub fn stage_preferences<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut PreferredHandlers) -> bool,
    {
        update(&mut self.state.lock().preferences)
    }

    /// Field activation. Arms an outstanding next-tap default.
    pub fn on_activation(&self) {
        self.state.lock().preferences.on_activation();
    }

    /// Field deactivation. Rebuilds when a next-tap default was consumed.
    pub fn on_deactivation(&self) -> Option<RebuildReport> {
        let mut state = self.state.lock();
        if !state.preferences.on_deactivation() {
            return None;
        }
        Some(self.rebuild_locked(&mut state, false))
    }

    /// Field deactivation without the rebuild; true when a next-tap default was consumed.
    pub fn stage_deactivation(&self) -> bool {
        self.state.lock().preferences.on_deactivation()
    }

    pub fn on_controller_enabled(&self) -> RebuildReport {
        let mut state = self.state.lock();
        state.routing.on_controller_enabled();
        state.system_codes.on_routing_table_cleared();
        self.rebuild_locked(&mut state, true)
    }

    /// Re-enable commits; the next rebuild re-commits everything.
    pub fn stage_controller_enabled(&self) {
        let mut state = self.state.lock();
        state.routing.on_controller_enabled();
        state.system_codes.on_routing_table_cleared();
        state.force_pending = true;
    }

    pub fn on_controller_disabled(&self) {
        let mut state = self.state.lock();
        state.routing.on_controller_disabled();
        state.system_codes.on_routing_table_cleared();
    }

    /// The controller lost its table; everything is committed again.
    pub fn on_routing_table_cleared(&self) -> RebuildReport {
        let mut state = self.state.lock();
        state.routing.on_routing_table_cleared();
        state.system_codes.on_routing_table_cleared();
        self.rebuild_locked(&mut state, true)
    }

    /// [`ResolutionEngine::on_routing_table_cleared`], committed by the next rebuild.
    pub fn stage_routing_table_cleared(&self) {
        let mut state = self.state.lock();
        state.routing.on_routing_table_cleared();
        state.system_codes.on_routing_table_cleared();
        state.force_pending = true;
    }

    pub fn set_routing_options(&self, options: RoutingOptions) -> Option<RebuildReport> {
        let mut state = self.state.lock();
        if !state.routing.set_options(options) {
            return None;
        }
        Some(self.rebuild_locked(&mut state, true))
    }

    /// Secure NFC was toggled; the table is re-committed when configured to.
    pub fn on_secure_nfc_toggled(&self) -> Option<RebuildReport> {
        let mut state = self.state.lock();
        if !state.routing.options().force_commit_on_secure_toggle {
            return None;
        }
        Some(self.rebuild_locked(&mut state, true))
    }

    pub fn rebuild(&self, force: bool) -> RebuildReport {
        let mut state = self.state.lock();
        self.rebuild_locked(&mut state, force)
    }

    fn rebuild_locked(&self, state: &mut ResolutionState, force: bool) -> RebuildReport {
        let force = force || std::mem::take(&mut state.force_pending);
        state.version += 1;
        let mode = state.routing.capabilities().matching_mode;
        let snapshot = Arc::new(ResolutionSnapshot::build(
            state.version,
            &state.sets,
            &state.scopes,
            &state.preferences,
            mode,
        ));

        let routing = state.routing.update(snapshot.cache.entries(), force);
        if let RoutingOutcome::Overflow {
            required,
            capacity,
            first_report: true,
        } = routing
        {
            self.listener.on_routing_overflow(required, capacity);
        }

        let t3t_changed =
            state.routing.is_enabled() && state.system_codes.configure(&snapshot.t3t.identifiers());

        info!(
            version = state.version,
            entries = snapshot.cache.len(),
            rejected = snapshot.rejected.len(),
            "Resolution snapshot published"
        );
        *self.snapshot.write() = snapshot;

        RebuildReport {
            version: state.version,
            routing,
            t3t_changed,
        }
    }

    /// Human-readable state of the cache and the committed table.
    pub fn dump(&self) -> Vec<String> {
        let state = self.state.lock();
        let snapshot = self.snapshot();
        let mut out = vec![format!("snapshot version: {}", snapshot.version)];
        out.push("resolution cache:".to_string());
        out.extend(snapshot.cache.dump().into_iter().map(|line| format!("  {}", line)));
        if !snapshot.rejected.is_empty() {
            out.push("rejected claims:".to_string());
            out.extend(
                snapshot
                    .rejected
                    .iter()
                    .map(|r| format!("  {} {} ({})", r.handler, r.literal, r.reason)),
            );
        }
        out.push("routing:".to_string());
        out.extend(state.routing.dump().into_iter().map(|line| format!("  {}", line)));
        if !state.system_codes.registered().is_empty() {
            out.push("t3t identifiers:".to_string());
            out.extend(
                state
                    .system_codes
                    .registered()
                    .iter()
                    .map(|id| format!("  {}", id)),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingListener;
    use hce_routing::MockController;
    use hce_types::{Category, HandlerId};

    fn handler(pkg: &str) -> HandlerInfo {
        HandlerInfo::new(HandlerId::new(pkg, "Svc"), UserId(0))
    }

    fn engine(capacity: usize) -> (ResolutionEngine, Arc<MockController>, Arc<RecordingListener>) {
        let mut caps = ControllerCapabilities::default();
        caps.max_routing_table_size = capacity;
        let controller = Arc::new(MockController::new());
        let listener = Arc::new(RecordingListener::new());
        let engine = ResolutionEngine::new(
            caps,
            RoutingOptions::default(),
            controller.clone(),
            listener.clone(),
        );
        (engine, controller, listener)
    }

    #[test]
    fn test_rebuild_publishes_new_version() {
        let (engine, _, _) = engine(256);
        assert_eq!(engine.snapshot().version, 0);
        let report = engine.set_handlers(
            UserId(0),
            vec![handler("com.a").with_aids(Category::Other, ["F0010203040506"])],
        );
        assert_eq!(report.version, 1);
        assert_eq!(engine.snapshot().version, 1);
        let aid = Aid::parse("F0010203040506").unwrap();
        assert_eq!(
            engine.resolve(&aid).default_handler(),
            Some(&handler("com.a").handler_ref())
        );
    }

    #[test]
    fn test_unchanged_rebuild_skips_commit() {
        let (engine, controller, _) = engine(256);
        let se = handler("com.se")
            .off_host("eSE1")
            .with_aids(Category::Other, ["A0000000030101"]);
        engine.set_handlers(UserId(0), vec![se]);
        let commits = controller.commits().len();
        let report = engine.rebuild(false);
        assert_eq!(report.routing, RoutingOutcome::Unchanged);
        assert_eq!(controller.commits().len(), commits);
    }

    #[test]
    fn test_overflow_reported_once() {
        let (engine, _, listener) = engine(10);
        let aids: Vec<String> = (0..8).map(|i| format!("A00000000301{:02X}", i)).collect();
        let se = handler("com.se").off_host("eSE1").with_aids(Category::Other, aids);
        let other = handler("com.host").with_aids(Category::Other, ["F0010203040506"]);
        engine.set_handlers(UserId(0), vec![se, other]);
        engine.rebuild(false);
        assert_eq!(listener.overflows().len(), 1);
    }

    #[test]
    fn test_next_tap_consumed_on_deactivation() {
        let (engine, _, _) = engine(256);
        let a = handler("com.a").with_aids(Category::Other, ["F0010203040506"]);
        let b = handler("com.b").with_aids(Category::Other, ["F0010203040506"]);
        engine.set_handlers(UserId(0), vec![a.clone(), b]);
        let aid = Aid::parse("F0010203040506").unwrap();
        assert!(engine.resolve(&aid).default_handler().is_none());

        assert!(engine
            .update_preferences(|p| p.set_next_tap(Some(a.handler_ref())))
            .is_some());
        assert_eq!(engine.resolve(&aid).default_handler(), Some(&a.handler_ref()));

        engine.on_activation();
        assert!(engine.on_deactivation().is_some());
        assert!(engine.resolve(&aid).default_handler().is_none());
    }

    #[test]
    fn test_dynamic_aids_survive_handler_repush() {
        let (engine, _, _) = engine(256);
        let a = handler("com.a");
        engine.set_handlers(UserId(0), vec![a.clone()]);
        engine.set_dynamic_aids(
            &a.handler_ref(),
            vec![AidGroup::new(Category::Other, ["F0010203040506"])],
        );
        engine.set_handlers(UserId(0), vec![a.clone()]);
        let aid = Aid::parse("F0010203040506").unwrap();
        assert_eq!(engine.resolve(&aid).default_handler(), Some(&a.handler_ref()));
    }

    #[test]
    fn test_controller_disabled_skips_commit() {
        let (engine, controller, _) = engine(256);
        engine.on_controller_disabled();
        let report = engine.set_handlers(
            UserId(0),
            vec![handler("com.a").with_aids(Category::Other, ["F0010203040506"])],
        );
        assert_eq!(report.routing, RoutingOutcome::Disabled);
        assert_eq!(controller.clear_count(), 1);

        let report = engine.on_controller_enabled();
        assert!(matches!(report.routing, RoutingOutcome::Committed { .. }));
    }

    #[test]
    fn test_staged_changes_wait_for_rebuild() {
        let (engine, controller, _) = engine(256);
        let a = handler("com.a").with_aids(Category::Other, ["F0010203040506"]);
        let b = handler("com.b").with_aids(Category::Other, ["F0010203040506"]);
        engine.set_handlers(UserId(0), vec![a.clone(), b]);
        let commits = controller.commits().len();
        let aid = Aid::parse("F0010203040506").unwrap();

        assert!(engine.stage_preferences(|p| p.set_foreground(Some(a.handler_ref()))));
        engine.stage_routing_table_cleared();
        assert_eq!(engine.snapshot().version, 1);
        assert!(engine.resolve(&aid).default_handler().is_none());
        assert_eq!(controller.commits().len(), commits);

        let report = engine.rebuild(false);
        assert_eq!(report.version, 2);
        assert!(matches!(report.routing, RoutingOutcome::Committed { .. }));
        assert_eq!(engine.resolve(&aid).default_handler(), Some(&a.handler_ref()));

        let report = engine.rebuild(false);
        assert_eq!(report.routing, RoutingOutcome::Unchanged);
    }

    #[test]
    fn test_switch_user_hides_previous_handlers() {
        let (engine, _, _) = engine(256);
        engine.set_handlers(
            UserId(0),
            vec![handler("com.a").with_aids(Category::Other, ["F0010203040506"])],
        );
        engine.switch_user(UserId(10), None);
        assert_eq!(engine.current_user(), UserId(10));
        let aid = Aid::parse("F0010203040506").unwrap();
        assert!(engine.resolve(&aid).is_empty());
    }
}
