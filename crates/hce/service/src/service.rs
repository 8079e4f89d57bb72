//! Facade over the two lock domains.
//!
//! The resolution lock lives in [`ResolutionEngine`]; the dispatch lock is
//! the pair of dispatcher mutexes here. No method holds both at once: a
//! dispatch only clones the current snapshot before taking its own lock.

use std::sync::Arc;
use std::time::Duration;

use hce_dispatch::{
    DispatchAction, HostDispatcher, HostEvent, HostOptions, HostState, NfcFDispatcher, NfcFEvent,
    NfcFState,
};
use hce_resolver::{PreferenceKind, PreferredHandlers, WalletHolder};
use hce_routing::{NfcController, RoutingOptions};
use hce_types::{Aid, AidGroup, HandlerInfo, HandlerRef, ResolveEntry, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::{
    DeviceStateProvider, DisambiguationUi, EngineListener, HandlerDirectory, HandlerTransport,
    ReaderLink,
};
use crate::config::ServiceConfig;
use crate::engine::{RebuildReport, ResolutionEngine};
use crate::error::ServiceResult;
use crate::store::{Settings, SettingsStore};

/// Everything the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn HandlerTransport>,
    pub reader: Arc<dyn ReaderLink>,
    pub ui: Arc<dyn DisambiguationUi>,
    pub device: Arc<dyn DeviceStateProvider>,
    pub listener: Arc<dyn EngineListener>,
}

/// A preference update pushed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "preference", rename_all = "snake_case")]
pub enum PreferenceChange {
    Foreground { handler: Option<HandlerRef> },
    /// Result of a disambiguation prompt; holds for one tap.
    NextTap { handler: Option<HandlerRef> },
    PaymentDefault { handler: Option<HandlerRef> },
    WalletHolder { holder: Option<WalletHolder> },
    WalletRoleEnabled { enabled: bool },
    NfcFForeground { handler: Option<HandlerRef> },
}

impl PreferenceChange {
    pub fn kind(&self) -> PreferenceKind {
        match self {
            PreferenceChange::Foreground { .. } => PreferenceKind::Foreground,
            PreferenceChange::NextTap { .. } => PreferenceKind::NextTap,
            PreferenceChange::PaymentDefault { .. } => PreferenceKind::PaymentDefault,
            PreferenceChange::WalletHolder { .. } | PreferenceChange::WalletRoleEnabled { .. } => {
                PreferenceKind::WalletRole
            }
            PreferenceChange::NfcFForeground { .. } => PreferenceKind::NfcFForeground,
        }
    }

    fn apply(self, prefs: &mut PreferredHandlers) -> bool {
        match self {
            PreferenceChange::Foreground { handler } => prefs.set_foreground(handler),
            PreferenceChange::NextTap { handler } => prefs.set_next_tap(handler),
            PreferenceChange::PaymentDefault { handler } => prefs.set_payment_default(handler),
            PreferenceChange::WalletHolder { holder } => prefs.set_wallet_holder(holder),
            PreferenceChange::WalletRoleEnabled { enabled } => {
                prefs.set_wallet_role_enabled(enabled)
            }
            PreferenceChange::NfcFForeground { handler } => prefs.set_nfcf_foreground(handler),
        }
    }
}

/// Dispatcher notification owed once a preference or user change is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingNotice {
    Preference(PreferenceKind),
    UserSwitched,
}

/// Timer work requested by the polling loop; owned by the caller's runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    Arm(Duration),
    Cancel,
}

pub struct HceService {
    engine: ResolutionEngine,
    host: Mutex<HostDispatcher>,
    nfcf: Mutex<NfcFDispatcher>,
    collaborators: Collaborators,
    store: Arc<dyn SettingsStore>,
    settings: Mutex<Settings>,
}

impl HceService {
    pub fn new(
        config: &ServiceConfig,
        controller: Arc<dyn NfcController>,
        collaborators: Collaborators,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let engine = ResolutionEngine::new(
            config.controller.capabilities(),
            config.routing.options(),
            controller,
            collaborators.listener.clone(),
        );
        if config.dispatch.wallet_role_enabled {
            engine.update_preferences(|p| p.set_wallet_role_enabled(true));
        }
        info!(
            matching_mode = ?config.controller.aid_matching_mode,
            secure_nfc = config.dispatch.secure_nfc,
            "Card emulation service created"
        );
        Self {
            engine,
            host: Mutex::new(HostDispatcher::new(config.dispatch.host_options())),
            nfcf: Mutex::new(NfcFDispatcher::new()),
            collaborators,
            store,
            settings: Mutex::new(Settings::default()),
        }
    }

    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    pub fn host_state(&self) -> HostState {
        self.host.lock().state()
    }

    pub fn nfcf_state(&self) -> NfcFState {
        self.nfcf.lock().state()
    }

    /// Read-only query used by preference-conflict checks elsewhere.
    pub fn resolve(&self, aid: &Aid) -> ResolveEntry {
        self.engine.resolve(aid)
    }

    pub fn is_default_handler_for_aid(&self, handler: &HandlerRef, aid: &Aid) -> bool {
        self.engine.snapshot().is_default_handler_for_aid(handler, aid)
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Load persisted settings and apply them to the current user.
    pub async fn load_settings(&self) -> ServiceResult<()> {
        let settings = self.store.load().await?;
        let user = self.engine.current_user();
        let payment = settings.payment_defaults.get(&user).cloned();
        for dynamic in &settings.dynamic_aids {
            self.engine
                .set_dynamic_aids(&dynamic.handler, dynamic.groups.clone());
        }
        info!(
            payment_defaults = settings.payment_defaults.len(),
            dynamic = settings.dynamic_aids.len(),
            "Settings loaded"
        );
        *self.settings.lock() = settings;
        if payment.is_some()
            && self
                .engine
                .update_preferences(|p| p.set_payment_default(payment))
                .is_some()
        {
            self.notify_dispatchers(PendingNotice::Preference(PreferenceKind::PaymentDefault));
        }
        Ok(())
    }

    async fn persist(&self) -> ServiceResult<()> {
        let settings = self.settings.lock().clone();
        self.store.save(&settings).await
    }

    /// Register dynamic AID groups for a handler and persist them.
    pub async fn set_dynamic_aids(
        &self,
        handler: &HandlerRef,
        groups: Vec<AidGroup>,
    ) -> ServiceResult<RebuildReport> {
        for group in &groups {
            for literal in &group.aids {
                Aid::parse(literal)?;
            }
        }
        let report = self.engine.set_dynamic_aids(handler, groups.clone());
        self.settings
            .lock()
            .set_dynamic_groups(handler.clone(), groups);
        self.persist().await?;
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Recomputation triggers
    // -------------------------------------------------------------------------

    pub fn on_handler_set_changed(&self, user: UserId, handlers: Vec<HandlerInfo>) -> RebuildReport {
        self.engine.set_handlers(user, handlers)
    }

    /// Re-read the handlers of `user` from the directory and rebuild.
    pub async fn refresh_handlers(
        &self,
        directory: &dyn HandlerDirectory,
        user: UserId,
    ) -> ServiceResult<RebuildReport> {
        let handlers = directory.list_handlers(user).await?;
        Ok(self.engine.set_handlers(user, handlers))
    }

    /// Stage a handler set; the caller schedules the rebuild.
    pub fn stage_handler_set(&self, user: UserId, handlers: Vec<HandlerInfo>) {
        self.engine.stage_handlers(user, handlers);
    }

    pub fn rebuild(&self) -> RebuildReport {
        self.engine.rebuild(false)
    }

    /// Apply a preference change, persisting payment defaults.
    pub async fn on_preference_changed(&self, change: PreferenceChange) -> ServiceResult<()> {
        let kind = change.kind();
        if self.engine.update_preferences(|p| change.clone().apply(p)).is_none() {
            debug!(kind = %kind, "Preference unchanged");
            return Ok(());
        }
        self.notify_dispatchers(PendingNotice::Preference(kind));
        self.persist_preference(&change).await
    }

    /// Apply a preference change without rebuilding.
    ///
    /// Returns the notice to deliver once the caller's rebuild has published,
    /// or `None` when nothing changed.
    pub fn stage_preference_change(&self, change: &PreferenceChange) -> Option<PendingNotice> {
        let kind = change.kind();
        if !self.engine.stage_preferences(|p| change.clone().apply(p)) {
            debug!(kind = %kind, "Preference unchanged");
            return None;
        }
        Some(PendingNotice::Preference(kind))
    }

    /// Save a payment default change for the current user; other changes are not persisted.
    pub async fn persist_preference(&self, change: &PreferenceChange) -> ServiceResult<()> {
        let PreferenceChange::PaymentDefault { handler } = change else {
            return Ok(());
        };
        let user = self.engine.current_user();
        {
            let mut settings = self.settings.lock();
            match handler {
                Some(handler) => settings.payment_defaults.insert(user, handler.clone()),
                None => settings.payment_defaults.remove(&user),
            };
        }
        self.persist().await
    }

    /// Tell the dispatchers about a change already visible in the snapshot.
    pub fn notify_dispatchers(&self, notice: PendingNotice) {
        match notice {
            PendingNotice::Preference(
                kind @ (PreferenceKind::Foreground
                | PreferenceKind::NextTap
                | PreferenceKind::PaymentDefault),
            ) => {
                self.handle_host_event(HostEvent::PreferenceChanged { kind });
            }
            PendingNotice::Preference(PreferenceKind::NfcFForeground) => {
                let handler = self.engine.snapshot().preferences.nfcf_foreground().cloned();
                self.handle_nfcf_event(NfcFEvent::ForegroundChanged { handler });
            }
            PendingNotice::Preference(PreferenceKind::WalletRole) => {}
            PendingNotice::UserSwitched => {
                self.handle_host_event(HostEvent::PreferenceChanged {
                    kind: PreferenceKind::PaymentDefault,
                });
                self.handle_nfcf_event(NfcFEvent::UserSwitched);
            }
        }
    }

    pub fn on_controller_enabled(&self) -> RebuildReport {
        self.engine.on_controller_enabled()
    }

    pub fn on_controller_disabled(&self) {
        self.engine.on_controller_disabled();
        self.handle_nfcf_event(NfcFEvent::ControllerDisabled);
    }

    pub fn on_routing_table_cleared(&self) -> RebuildReport {
        self.engine.on_routing_table_cleared()
    }

    pub fn set_routing_options(&self, options: RoutingOptions) -> Option<RebuildReport> {
        self.engine.set_routing_options(options)
    }

    pub fn set_secure_nfc(&self, enabled: bool) -> Option<RebuildReport> {
        {
            let mut host = self.host.lock();
            if host.options().secure_nfc == enabled {
                return None;
            }
            host.set_options(HostOptions { secure_nfc: enabled });
        }
        info!(enabled, "Secure NFC toggled");
        self.engine.on_secure_nfc_toggled()
    }

    pub fn on_user_switched(&self, user: UserId) -> RebuildReport {
        let payment = self.settings.lock().payment_defaults.get(&user).cloned();
        let report = self.engine.switch_user(user, payment);
        self.notify_dispatchers(PendingNotice::UserSwitched);
        report
    }

    /// Switch users without rebuilding; deliver the notice after the rebuild.
    pub fn stage_user_switch(&self, user: UserId) -> PendingNotice {
        let payment = self.settings.lock().payment_defaults.get(&user).cloned();
        self.engine.stage_user_switch(user, payment);
        PendingNotice::UserSwitched
    }

    // -------------------------------------------------------------------------
    // ISO-DEP dispatch
    // -------------------------------------------------------------------------

    pub fn on_activation(&self) -> Option<TimerRequest> {
        self.engine.on_activation();
        self.handle_host_event(HostEvent::Activated)
    }

    pub fn on_frame(&self, data: &[u8]) -> Option<TimerRequest> {
        self.handle_host_event(HostEvent::frame(data))
    }

    pub fn on_deactivation(&self) -> Option<TimerRequest> {
        let timer = self.handle_host_event(HostEvent::Deactivated);
        if self.engine.on_deactivation().is_some() {
            self.notify_dispatchers(PendingNotice::Preference(PreferenceKind::NextTap));
        }
        timer
    }

    /// Deactivation without the rebuild.
    ///
    /// Returns the timer request and, when a next-tap default was consumed,
    /// the notice to deliver after the caller's rebuild.
    pub fn stage_deactivation(&self) -> (Option<TimerRequest>, Option<PendingNotice>) {
        let timer = self.handle_host_event(HostEvent::Deactivated);
        let notice = self
            .engine
            .stage_deactivation()
            .then_some(PendingNotice::Preference(PreferenceKind::NextTap));
        (timer, notice)
    }

    /// Feed one event to the ISO-DEP dispatcher and carry out its actions.
    pub fn handle_host_event(&self, event: HostEvent) -> Option<TimerRequest> {
        timer_request(&self.dispatch_host(event))
    }

    /// Like [`HceService::handle_host_event`], returning the executed actions.
    pub fn dispatch_host(&self, event: HostEvent) -> Vec<DispatchAction> {
        let snapshot = self.engine.snapshot();
        let device = self.collaborators.device.device_state();
        let mut host = self.host.lock();
        let actions = host.handle(event, &snapshot, device);
        self.execute(&actions);
        actions
    }

    // -------------------------------------------------------------------------
    // NFC-F dispatch
    // -------------------------------------------------------------------------

    pub fn handle_nfcf_event(&self, event: NfcFEvent) {
        let snapshot = self.engine.snapshot();
        let mut nfcf = self.nfcf.lock();
        let actions = nfcf.handle(event, &snapshot);
        self.execute(&actions);
    }

    /// Carry out dispatch actions in order. Timer actions are left to the caller.
    fn execute(&self, actions: &[DispatchAction]) {
        let c = &self.collaborators;
        for action in actions {
            match action {
                DispatchAction::Reply { data } => c.reader.send_to_reader(data),
                DispatchAction::Bind { handler, purpose } => c.transport.bind(handler, *purpose),
                DispatchAction::Unbind { handler, purpose } => {
                    c.transport.unbind(handler, *purpose)
                }
                DispatchAction::Send {
                    channel,
                    handler,
                    message,
                } => c.transport.send(*channel, handler, message),
                DispatchAction::PromptUnlock { handler, category } => {
                    c.ui.prompt_unlock(handler, *category)
                }
                DispatchAction::PromptDisambiguation {
                    candidates,
                    failed,
                    category,
                } => c.ui.prompt(candidates, failed.as_ref(), *category),
                DispatchAction::ReportUnroutableAid { aid } => c.listener.on_unroutable_aid(aid),
                DispatchAction::AllowOneTransaction => c.reader.allow_one_transaction(),
                DispatchAction::ArmFieldOffTimer { .. } | DispatchAction::CancelFieldOffTimer => {}
            }
        }
    }

    pub fn dump(&self) -> Vec<String> {
        let mut out = self.engine.dump();
        let host = self.host.lock();
        out.push(format!("dispatch state: {}", host.state()));
        if let Some(handler) = host.active_handler() {
            out.push(format!("active handler: {}", handler));
        }
        out.push(format!("nfc-f state: {}", self.nfcf.lock().state()));
        out
    }
}

/// Net timer effect of a batch of actions; the last timer action wins.
pub fn timer_request(actions: &[DispatchAction]) -> Option<TimerRequest> {
    actions.iter().rev().find_map(|action| match action {
        DispatchAction::ArmFieldOffTimer { delay } => Some(TimerRequest::Arm(*delay)),
        DispatchAction::CancelFieldOffTimer => Some(TimerRequest::Cancel),
        _ => None,
    })
}
