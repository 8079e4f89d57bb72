//! ISO-DEP (APDU) dispatch state machine.
//!
//! [`HostDispatcher::handle`] is a transition function: it reads the current
//! [`ResolutionSnapshot`] and the device state, updates the session and
//! returns the actions the caller must carry out. Binding a handler is
//! asynchronous; completion comes back as [`HostEvent::HandlerConnected`].

use std::collections::BTreeMap;
use std::fmt;

use hce_resolver::{PreferenceKind, ResolutionSnapshot};
use hce_types::{Aid, HandlerClaim, HandlerRef, ResolveEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::action::{DeactivationReason, DispatchAction, HandlerMessage};
use crate::apdu::{self, DISCOVERY_RESPONSE, SW_NOT_FOUND, SW_UNKNOWN_ERROR};
use crate::event::{BindPurpose, ChannelId, DeviceState, HostEvent};
use crate::polling::{
    looks_like_reader, PollingFrame, PollingFrameKind, PollingLoopState, FIELD_OFF_IDLE_DELAY,
};

/// Session state of the ISO-DEP link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// No field.
    Idle,

    /// Link active, waiting for the first SELECT.
    WaitSelect,

    /// A SELECT is queued until the handler connects.
    WaitHandler,

    /// Frames flow between the reader and the active handler.
    Transfer,

    /// The user has to choose a handler; frames are dropped until the field goes.
    WaitDeactivate,

    /// Polling frames are arriving but no link has been activated yet.
    PollingLoop,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Idle => write!(f, "idle"),
            HostState::WaitSelect => write!(f, "wait-select"),
            HostState::WaitHandler => write!(f, "wait-handler"),
            HostState::Transfer => write!(f, "transfer"),
            HostState::WaitDeactivate => write!(f, "wait-deactivate"),
            HostState::PollingLoop => write!(f, "polling-loop"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOptions {
    /// Every handler behaves as if it required an unlocked device.
    pub secure_nfc: bool,
}

/// A handler connection; `channel` is `None` while the bind is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    handler: HandlerRef,
    channel: Option<ChannelId>,
}

impl Binding {
    fn connected_to(&self, handler: &HandlerRef) -> Option<ChannelId> {
        if &self.handler == handler {
            self.channel
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveHandler {
    handler: HandlerRef,
    channel: ChannelId,
}

pub struct HostDispatcher {
    options: HostOptions,
    state: HostState,
    polling_state: PollingLoopState,
    regular: Option<Binding>,
    payment: Option<Binding>,
    last_bound_payment: Option<HandlerRef>,
    active: Option<ActiveHandler>,
    /// SELECT queued until its handler connects.
    pending_select: Option<(HandlerRef, Vec<u8>)>,
    /// Polling frames still being evaluated.
    pending_frames: Vec<PollingFrame>,
    /// Frames that arrived while an earlier batch waited for its handler.
    unprocessed_frames: Option<Vec<PollingFrame>>,
    /// Polling frames waiting for a handler to connect.
    frames_to_send: BTreeMap<HandlerRef, Vec<PollingFrame>>,
    last_selected_aid: Option<Aid>,
}

impl HostDispatcher {
    pub fn new(options: HostOptions) -> Self {
        Self {
            options,
            state: HostState::Idle,
            polling_state: PollingLoopState::Evaluating,
            regular: None,
            payment: None,
            last_bound_payment: None,
            active: None,
            pending_select: None,
            pending_frames: Vec::new(),
            unprocessed_frames: None,
            frames_to_send: BTreeMap::new(),
            last_selected_aid: None,
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn polling_state(&self) -> PollingLoopState {
        self.polling_state
    }

    pub fn options(&self) -> HostOptions {
        self.options
    }

    pub fn set_options(&mut self, options: HostOptions) {
        self.options = options;
    }

    pub fn active_handler(&self) -> Option<&HandlerRef> {
        self.active.as_ref().map(|a| &a.handler)
    }

    pub fn last_selected_aid(&self) -> Option<&Aid> {
        self.last_selected_aid.as_ref()
    }

    /// True between activation and deactivation of the ISO-DEP link.
    pub fn is_activated(&self) -> bool {
        !matches!(self.state, HostState::Idle | HostState::PollingLoop)
    }

    pub fn handle(
        &mut self,
        event: HostEvent,
        snapshot: &ResolutionSnapshot,
        device: DeviceState,
    ) -> Vec<DispatchAction> {
        let before = self.state;
        let name = event.name();
        let mut out = Vec::new();

        match event {
            HostEvent::Activated => self.on_activated(&mut out),
            HostEvent::Frame { data } => self.on_frame(data, snapshot, device, &mut out),
            HostEvent::Deactivated => self.on_deactivated(&mut out),
            HostEvent::OffHostAidSelected => self.on_off_host_selected(&mut out),
            HostEvent::PollingFrames { frames } => self.on_polling_frames(frames, snapshot, &mut out),
            HostEvent::FieldOffTimeout => self.on_field_off_timeout(),
            HostEvent::HandlerConnected {
                handler,
                channel,
                purpose,
            } => match purpose {
                BindPurpose::Regular => {
                    self.on_regular_connected(handler, channel, snapshot, &mut out)
                }
                BindPurpose::Payment => self.on_payment_connected(handler, channel, &mut out),
            },
            HostEvent::HandlerDisconnected { handler, purpose } => {
                self.on_disconnected(&handler, purpose)
            }
            HostEvent::BindingDied { handler, purpose } => {
                self.on_binding_died(handler, purpose, &mut out)
            }
            HostEvent::Response { channel, data } => self.on_response(channel, data, &mut out),
            HostEvent::Unhandled { channel } => self.on_unhandled(channel, snapshot, &mut out),
            HostEvent::PreferenceChanged { kind } => {
                self.on_preference_changed(kind, snapshot, &mut out)
            }
        }

        if self.state != before {
            debug!(from = %before, to = %self.state, event = name, "Dispatch state changed");
        }
        out
    }

    fn on_activated(&mut self, out: &mut Vec<DispatchAction>) {
        match self.state {
            HostState::Idle => {}
            HostState::PollingLoop => out.push(DispatchAction::CancelFieldOffTimer),
            other => error!(state = %other, "Activation while the link is already active"),
        }
        self.state = HostState::WaitSelect;
    }

    fn on_frame(
        &mut self,
        data: Vec<u8>,
        snapshot: &ResolutionSnapshot,
        device: DeviceState,
        out: &mut Vec<DispatchAction>,
    ) {
        let select = match apdu::parse_select(&data) {
            Ok(select) => select,
            Err(e) => {
                warn!(error = %e, "Malformed SELECT, passing frame through");
                None
            }
        };

        match self.state {
            HostState::Idle => {
                error!("Got data in idle state");
                return;
            }
            HostState::WaitDeactivate => {
                debug!("Dropping frame while waiting for deactivation");
                return;
            }
            _ => {}
        }

        let mut resolved = None;
        if let Some(aid) = select {
            if apdu::is_discovery_aid(&aid) {
                out.push(DispatchAction::reply(DISCOVERY_RESPONSE));
                return;
            }
            let entry = snapshot.resolve(&aid);
            if entry.is_empty() {
                self.reply_unroutable(&aid, device, out);
                return;
            }
            self.last_selected_aid = Some(aid.clone());
            match self.pick_handler(&entry, device, out) {
                Pick::Handler(handler) => resolved = Some(handler),
                Pick::Refused => return,
                Pick::Ambiguous => {
                    info!(aid = %aid, candidates = entry.candidates().len(), "AID conflict, asking the user");
                    self.state = HostState::WaitDeactivate;
                    out.push(DispatchAction::PromptDisambiguation {
                        candidates: entry.handlers(),
                        failed: None,
                        category: entry.category,
                    });
                    return;
                }
            }
        }

        match (self.state, resolved) {
            (HostState::WaitSelect, Some(handler)) => match self.bind_if_needed(&handler, snapshot, out) {
                Some(channel) => {
                    debug!(handler = %handler, "Handler already bound");
                    self.send_command(handler, channel, data, out);
                }
                None => {
                    debug!(handler = %handler, "Waiting for handler to connect");
                    self.pending_select = Some((handler, data));
                    self.state = HostState::WaitHandler;
                }
            },
            (HostState::WaitSelect, None) => {
                debug!("Non-SELECT frame before any SELECT");
                out.push(DispatchAction::reply(SW_UNKNOWN_ERROR));
            }
            (HostState::WaitHandler, _) => {
                debug!("Unexpected frame while waiting for the handler to connect");
            }
            (HostState::Transfer, Some(handler)) => match self.bind_if_needed(&handler, snapshot, out) {
                Some(channel) => self.send_command(handler, channel, data, out),
                None => {
                    self.pending_select = Some((handler, data));
                    self.state = HostState::WaitHandler;
                }
            },
            (HostState::Transfer, None) => match self.active.clone() {
                Some(active) => self.send_command(active.handler, active.channel, data, out),
                None => debug!("Dropping frame, no active handler"),
            },
            (state, _) => warn!(state = %state, "Dropping frame in unexpected state"),
        }
    }

    fn reply_unroutable(&self, aid: &Aid, device: DeviceState, out: &mut Vec<DispatchAction>) {
        if apdu::is_ndef_aid(aid) {
            warn!(aid = %aid, "Cannot route NDEF AID, replying not found");
        } else if !device.screen_on {
            info!(aid = %aid, "Screen is off, replying not found");
        } else {
            warn!(aid = %aid, "No handler for AID, replying not found");
            out.push(DispatchAction::ReportUnroutableAid { aid: aid.clone() });
        }
        out.push(DispatchAction::reply(SW_NOT_FOUND));
    }

    fn pick_handler(
        &self,
        entry: &ResolveEntry,
        device: DeviceState,
        out: &mut Vec<DispatchAction>,
    ) -> Pick {
        if let Some(claim) = entry.default_claim() {
            return self.check_default(claim, entry, device, out);
        }
        match &self.active {
            Some(active) if entry.contains(&active.handler) => Pick::Handler(active.handler.clone()),
            _ => Pick::Ambiguous,
        }
    }

    fn check_default(
        &self,
        claim: &HandlerClaim,
        entry: &ResolveEntry,
        device: DeviceState,
        out: &mut Vec<DispatchAction>,
    ) -> Pick {
        if (claim.requires_unlock || self.options.secure_nfc) && device.locked {
            info!(handler = %claim.handler, "Handler requires an unlocked device");
            out.push(DispatchAction::reply(SW_NOT_FOUND));
            out.push(DispatchAction::PromptUnlock {
                handler: claim.handler.clone(),
                category: entry.category,
            });
            return Pick::Refused;
        }
        if claim.requires_screen_on && !device.screen_on {
            info!(handler = %claim.handler, "Handler requires the screen on");
            out.push(DispatchAction::reply(SW_NOT_FOUND));
            return Pick::Refused;
        }
        if !claim.is_on_host() {
            error!(
                aid = %entry.aid,
                handler = %claim.handler,
                "AID meant for a secure element reached the host; check the routing table"
            );
            out.push(DispatchAction::reply(SW_NOT_FOUND));
            return Pick::Refused;
        }
        Pick::Handler(claim.handler.clone())
    }

    /// Channel to `handler` if one is open; otherwise start a bind and return `None`.
    fn bind_if_needed(
        &mut self,
        handler: &HandlerRef,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) -> Option<ChannelId> {
        if let Some(channel) = self.payment.as_ref().and_then(|b| b.connected_to(handler)) {
            return Some(channel);
        }
        if self.payment.is_none() && snapshot.preferences.is_payment_default(handler) {
            self.bind_payment(handler.clone(), out);
            return None;
        }
        if let Some(channel) = self.regular.as_ref().and_then(|b| b.connected_to(handler)) {
            return Some(channel);
        }
        self.unbind_regular(out);
        debug!(handler = %handler, "Binding handler");
        self.regular = Some(Binding {
            handler: handler.clone(),
            channel: None,
        });
        out.push(DispatchAction::Bind {
            handler: handler.clone(),
            purpose: BindPurpose::Regular,
        });
        None
    }

    fn bind_payment(&mut self, handler: HandlerRef, out: &mut Vec<DispatchAction>) {
        self.unbind_payment(out);
        debug!(handler = %handler, "Binding payment handler");
        self.payment = Some(Binding {
            handler: handler.clone(),
            channel: None,
        });
        self.last_bound_payment = Some(handler.clone());
        out.push(DispatchAction::Bind {
            handler,
            purpose: BindPurpose::Payment,
        });
    }

    fn unbind_payment(&mut self, out: &mut Vec<DispatchAction>) {
        if let Some(binding) = self.payment.take() {
            debug!(handler = %binding.handler, "Unbinding payment handler");
            out.push(DispatchAction::Unbind {
                handler: binding.handler,
                purpose: BindPurpose::Payment,
            });
        }
    }

    fn unbind_regular(&mut self, out: &mut Vec<DispatchAction>) {
        if let Some(binding) = self.regular.take() {
            debug!(handler = %binding.handler, "Unbinding handler");
            out.push(DispatchAction::Unbind {
                handler: binding.handler,
                purpose: BindPurpose::Regular,
            });
        }
    }

    /// Forward a command and make `handler` the active one.
    fn send_command(
        &mut self,
        handler: HandlerRef,
        channel: ChannelId,
        data: Vec<u8>,
        out: &mut Vec<DispatchAction>,
    ) {
        self.state = HostState::Transfer;
        if let Some(previous) = &self.active {
            if previous.channel != channel {
                debug!(from = %previous.handler, to = %handler, "Switching active handler");
                out.push(DispatchAction::deactivate(
                    previous.channel,
                    previous.handler.clone(),
                    DeactivationReason::Deselected,
                ));
            }
        }
        self.active = Some(ActiveHandler {
            handler: handler.clone(),
            channel,
        });
        out.push(DispatchAction::command(channel, handler, data));
    }

    fn on_deactivated(&mut self, out: &mut Vec<DispatchAction>) {
        if self.state == HostState::Idle {
            error!("Deactivation while already idle");
        }
        if let Some(active) = &self.active {
            out.push(DispatchAction::deactivate(
                active.channel,
                active.handler.clone(),
                DeactivationReason::LinkLoss,
            ));
        }
        self.unbind_regular(out);
        self.pending_select = None;
        self.return_to_idle();
        info!("Link deactivated");
    }

    fn return_to_idle(&mut self) {
        self.pending_frames.clear();
        self.frames_to_send.clear();
        self.unprocessed_frames = None;
        self.active = None;
        self.polling_state = PollingLoopState::Evaluating;
        self.state = HostState::Idle;
    }

    fn on_off_host_selected(&mut self, out: &mut Vec<DispatchAction>) {
        if self.state == HostState::Transfer {
            if let Some(active) = &self.active {
                out.push(DispatchAction::deactivate(
                    active.channel,
                    active.handler.clone(),
                    DeactivationReason::Deselected,
                ));
            }
        }
        self.active = None;
        self.pending_select = None;
        self.unbind_regular(out);
        self.state = HostState::WaitSelect;
    }

    fn on_field_off_timeout(&mut self) {
        if self.state == HostState::PollingLoop {
            debug!("Field stayed off, leaving polling loop");
            self.return_to_idle();
        }
    }

    fn on_polling_frames(
        &mut self,
        frames: Vec<PollingFrame>,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) {
        out.push(DispatchAction::CancelFieldOffTimer);
        if frames.last().is_some_and(|f| f.kind == PollingFrameKind::Off) {
            out.push(DispatchAction::ArmFieldOffTimer {
                delay: FIELD_OFF_IDLE_DELAY,
            });
        }
        if self.state == HostState::Idle {
            self.state = HostState::PollingLoop;
        }

        for frame in frames {
            if let Some(unprocessed) = self.unprocessed_frames.as_mut() {
                unprocessed.push(frame);
                continue;
            }
            match frame.kind {
                PollingFrameKind::F => self.send_to_preferred(vec![frame], snapshot, out),
                PollingFrameKind::Unknown => self.on_unknown_frame(frame, snapshot, out),
                _ => self.pending_frames.push(frame),
            }
        }

        if self.polling_state == PollingLoopState::Evaluating
            && looks_like_reader(&self.pending_frames)
        {
            self.polling_state = PollingLoopState::DeliveringToPreferred;
        }

        if self.polling_state == PollingLoopState::DeliveringToPreferred
            && !self.pending_frames.is_empty()
        {
            if snapshot.preferred_handler().is_some() {
                let frames = std::mem::take(&mut self.pending_frames);
                self.send_to_preferred(frames, snapshot, out);
            } else {
                info!("No preferred handler for polling frames, allowing one transaction");
                out.push(DispatchAction::AllowOneTransaction);
            }
        }
    }

    fn on_unknown_frame(
        &mut self,
        mut frame: PollingFrame,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) {
        let matches = snapshot.polling_matches(&frame.data_hex());
        let chosen = match matches.as_slice() {
            [] => {
                self.send_to_preferred(vec![frame], snapshot, out);
                return;
            }
            [only] => only.clone(),
            several => {
                let handlers: Vec<HandlerRef> =
                    several.iter().map(|m| m.handler.clone()).collect();
                let winner = snapshot.resolve_polling_conflict(&handlers);
                several
                    .iter()
                    .find(|m| Some(&m.handler) == winner.as_ref())
                    .unwrap_or(&several[0])
                    .clone()
            }
        };
        debug!(handler = %chosen.handler, frame = %frame.data_hex(), "Polling-loop filter matched");
        if chosen.auto_transact {
            out.push(DispatchAction::AllowOneTransaction);
            frame.triggered_auto_transact = true;
        }
        if chosen.on_host {
            let channel = self.bind_if_needed(&chosen.handler, snapshot, out);
            self.polling_state = PollingLoopState::FilterMatched;
            self.send_frames(chosen.handler, channel, vec![frame], out);
        }
    }

    fn send_to_preferred(
        &mut self,
        frames: Vec<PollingFrame>,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) {
        let Some(handler) = snapshot.preferred_handler().cloned() else {
            return;
        };
        let channel = self.bind_if_needed(&handler, snapshot, out);
        self.send_frames(handler, channel, frames, out);
    }

    /// Deliver polling frames now, or hold them until `handler` connects.
    fn send_frames(
        &mut self,
        handler: HandlerRef,
        channel: Option<ChannelId>,
        frames: Vec<PollingFrame>,
        out: &mut Vec<DispatchAction>,
    ) {
        if frames.is_empty() {
            return;
        }
        match channel {
            Some(channel) => out.push(DispatchAction::Send {
                channel,
                handler,
                message: HandlerMessage::PollingFrames { frames },
            }),
            None => {
                self.unprocessed_frames.get_or_insert_with(Vec::new);
                self.frames_to_send.entry(handler).or_default().extend(frames);
            }
        }
    }

    fn on_regular_connected(
        &mut self,
        handler: HandlerRef,
        channel: ChannelId,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) {
        let expected = self.regular.as_ref().map(|b| &b.handler) == Some(&handler);
        if !expected {
            debug!(handler = %handler, "Ignoring connection for a handler no longer wanted");
            return;
        }
        let preferred = snapshot.preferred_handler() == Some(&handler);
        if self.state == HostState::Idle && !preferred {
            debug!(handler = %handler, "Link already gone and handler not preferred");
            return;
        }
        if let Some(binding) = self.regular.as_mut() {
            binding.channel = Some(channel);
        }
        info!(handler = %handler, channel = %channel, "Handler connected");

        if let Some(select) = self.take_pending_select(&handler) {
            self.send_command(handler, channel, select, out);
        } else if let Some(frames) = self.frames_to_send.remove(&handler) {
            out.push(DispatchAction::Send {
                channel,
                handler,
                message: HandlerMessage::PollingFrames { frames },
            });
            if let Some(unprocessed) = self.unprocessed_frames.take().filter(|f| !f.is_empty()) {
                self.on_polling_frames(unprocessed, snapshot, out);
            }
        } else {
            debug!(handler = %handler, "Connected with nothing to send");
        }
    }

    fn on_payment_connected(
        &mut self,
        handler: HandlerRef,
        channel: ChannelId,
        out: &mut Vec<DispatchAction>,
    ) {
        if self.last_bound_payment.as_ref() != Some(&handler) {
            info!(handler = %handler, "Ignoring connection of a stale payment handler");
            return;
        }
        match self.payment.as_mut() {
            Some(binding) if binding.handler == handler => {
                binding.channel = Some(channel);
                info!(handler = %handler, channel = %channel, "Payment handler connected");
            }
            _ => {
                debug!(handler = %handler, "Payment handler connected after unbind");
                return;
            }
        }

        if self.state == HostState::WaitHandler {
            if let Some(select) = self.take_pending_select(&handler) {
                self.send_command(handler, channel, select, out);
            }
        }
    }

    fn take_pending_select(&mut self, handler: &HandlerRef) -> Option<Vec<u8>> {
        if !matches!(&self.pending_select, Some((target, _)) if target == handler) {
            return None;
        }
        self.pending_select.take().map(|(_, data)| data)
    }

    fn on_disconnected(&mut self, handler: &HandlerRef, purpose: BindPurpose) {
        let binding = match purpose {
            BindPurpose::Regular => &mut self.regular,
            BindPurpose::Payment => &mut self.payment,
        };
        if let Some(b) = binding.as_mut() {
            if &b.handler == handler {
                info!(handler = %handler, purpose = %purpose, "Handler disconnected");
                b.channel = None;
            }
        }
    }

    fn on_binding_died(
        &mut self,
        handler: HandlerRef,
        purpose: BindPurpose,
        out: &mut Vec<DispatchAction>,
    ) {
        match purpose {
            BindPurpose::Payment => {
                if self.last_bound_payment.as_ref() == Some(&handler) && self.payment.is_some() {
                    warn!(handler = %handler, "Payment handler died, rebinding");
                    self.bind_payment(handler, out);
                }
            }
            BindPurpose::Regular => {
                if self.regular.as_ref().map(|b| &b.handler) == Some(&handler) {
                    warn!(handler = %handler, "Handler died");
                    self.regular = None;
                }
            }
        }
    }

    fn on_response(&mut self, channel: ChannelId, data: Vec<u8>, out: &mut Vec<DispatchAction>) {
        match &self.active {
            None => {
                debug!(channel = %channel, "Dropping response, no active handler");
                return;
            }
            Some(active) if active.channel != channel => {
                debug!(channel = %channel, "Dropping response from a handler no longer active");
                return;
            }
            Some(_) => {}
        }
        if data.is_empty() {
            warn!("Dropping empty response");
            return;
        }
        if self.state == HostState::Transfer {
            out.push(DispatchAction::Reply { data });
        } else {
            debug!(state = %self.state, "Dropping response in wrong state");
        }
    }

    fn on_unhandled(
        &mut self,
        channel: ChannelId,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) {
        let Some(active) = self.active.as_ref().filter(|a| a.channel == channel) else {
            debug!(channel = %channel, "Ignoring unhandled notice from inactive handler");
            return;
        };
        let Some(aid) = &self.last_selected_aid else {
            return;
        };
        let entry = snapshot.resolve(aid);
        if entry.candidates().len() > 1 {
            info!(aid = %aid, handler = %active.handler, "Handler declined AID, asking the user");
            out.push(DispatchAction::PromptDisambiguation {
                candidates: entry.handlers(),
                failed: Some(active.handler.clone()),
                category: entry.category,
            });
        }
    }

    fn on_preference_changed(
        &mut self,
        kind: PreferenceKind,
        snapshot: &ResolutionSnapshot,
        out: &mut Vec<DispatchAction>,
    ) {
        match kind {
            PreferenceKind::PaymentDefault => {
                if !self.is_activated() {
                    self.active = None;
                }
                match snapshot.payment_default().cloned() {
                    Some(handler) => self.bind_payment(handler, out),
                    None => self.unbind_payment(out),
                }
            }
            PreferenceKind::Foreground | PreferenceKind::NextTap => {
                if !self.is_activated() {
                    self.active = None;
                }
                match snapshot.preferences.foreground().cloned() {
                    Some(handler) => {
                        self.bind_if_needed(&handler, snapshot, out);
                    }
                    None => self.unbind_regular(out),
                }
            }
            PreferenceKind::WalletRole | PreferenceKind::NfcFForeground => {}
        }
    }
}

impl Default for HostDispatcher {
    fn default() -> Self {
        Self::new(HostOptions::default())
    }
}

enum Pick {
    Handler(HandlerRef),
    /// A reply has already been queued.
    Refused,
    Ambiguous,
}
