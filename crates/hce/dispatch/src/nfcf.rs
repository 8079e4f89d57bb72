//! NFC-F (Type 3 Tag) dispatch.
//!
//! Simpler than the ISO-DEP path: packets are routed by the NFCID2 they
//! carry, and only the enabled foreground NFC-F handler may receive them.

use std::fmt;

use hce_resolver::ResolutionSnapshot;
use hce_types::{HandlerRef, Nfcid2, NFCID2_LEN};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::{DeactivationReason, DispatchAction};
use crate::error::{DispatchError, Result};
use crate::event::{BindPurpose, ChannelId, NfcFEvent};

const MIN_PACKET_LEN: usize = 10;
const NFCID2_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NfcFState {
    Idle,
    WaitHandler,
    Transfer,
}

impl fmt::Display for NfcFState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NfcFState::Idle => write!(f, "idle"),
            NfcFState::WaitHandler => write!(f, "wait-handler"),
            NfcFState::Transfer => write!(f, "transfer"),
        }
    }
}

/// NFCID2 carried by a command packet.
pub fn packet_nfcid2(packet: &[u8]) -> Result<Nfcid2> {
    if packet.len() < MIN_PACKET_LEN {
        return Err(DispatchError::PacketTooShort(packet.len()));
    }
    Nfcid2::from_slice(&packet[NFCID2_OFFSET..NFCID2_OFFSET + NFCID2_LEN])
        .ok_or(DispatchError::PacketTooShort(packet.len()))
}

/// A response packet starts with its own total length.
pub fn check_response(packet: &[u8]) -> Result<()> {
    let declared = packet.first().copied().unwrap_or(0) as usize;
    if packet.is_empty() || declared != packet.len() {
        return Err(DispatchError::ResponseLengthMismatch {
            declared,
            actual: packet.len(),
        });
    }
    Ok(())
}

pub struct NfcFDispatcher {
    state: NfcFState,
    enabled_foreground: Option<HandlerRef>,
    /// Bound handler and, once connected, its channel.
    bound: Option<(HandlerRef, Option<ChannelId>)>,
    active: Option<(HandlerRef, ChannelId)>,
    pending_packet: Option<Vec<u8>>,
}

impl NfcFDispatcher {
    pub fn new() -> Self {
        Self {
            state: NfcFState::Idle,
            enabled_foreground: None,
            bound: None,
            active: None,
            pending_packet: None,
        }
    }

    pub fn state(&self) -> NfcFState {
        self.state
    }

    pub fn enabled_foreground(&self) -> Option<&HandlerRef> {
        self.enabled_foreground.as_ref()
    }

    pub fn active_handler(&self) -> Option<&HandlerRef> {
        self.active.as_ref().map(|(h, _)| h)
    }

    pub fn handle(&mut self, event: NfcFEvent, snapshot: &ResolutionSnapshot) -> Vec<DispatchAction> {
        let before = self.state;
        let mut out = Vec::new();
        match event {
            NfcFEvent::Packet { data } => self.on_packet(data, snapshot, &mut out),
            NfcFEvent::Deactivated => self.tear_down(false, &mut out),
            NfcFEvent::ControllerDisabled | NfcFEvent::UserSwitched => {
                self.tear_down(true, &mut out)
            }
            NfcFEvent::HandlerConnected { handler, channel } => {
                self.on_connected(handler, channel, &mut out)
            }
            NfcFEvent::HandlerDisconnected { handler } => {
                if let Some((bound, channel)) = self.bound.as_mut() {
                    if bound == &handler {
                        *channel = None;
                    }
                }
            }
            NfcFEvent::Response { channel, data } => self.on_response(channel, data, &mut out),
            NfcFEvent::ForegroundChanged { handler } => {
                self.on_foreground_changed(handler, &mut out)
            }
        }
        if self.state != before {
            debug!(from = %before, to = %self.state, "NFC-F state changed");
        }
        out
    }

    fn on_packet(&mut self, data: Vec<u8>, snapshot: &ResolutionSnapshot, out: &mut Vec<DispatchAction>) {
        let resolved = match packet_nfcid2(&data) {
            Ok(nfcid2) => snapshot.resolve_nfcid2(&nfcid2).cloned(),
            Err(e) => {
                debug!(error = %e, "Packet carries no NFCID2");
                None
            }
        };
        let Some(target) = resolved.or_else(|| self.active.as_ref().map(|(h, _)| h.clone())) else {
            debug!("Dropping packet, no handler");
            return;
        };
        if self.enabled_foreground.as_ref() != Some(&target) {
            debug!(handler = %target, "Dropping packet for a handler that is not enabled");
            return;
        }

        match self.state {
            NfcFState::Idle => match self.bound_channel(&target) {
                Some(channel) => self.send_packet(target, channel, data, out),
                None => {
                    self.bind(target, out);
                    self.pending_packet = Some(data);
                    self.state = NfcFState::WaitHandler;
                }
            },
            NfcFState::WaitHandler => debug!("Unexpected packet while waiting for the handler"),
            NfcFState::Transfer => match self.active.clone() {
                Some((handler, channel)) => self.send_packet(handler, channel, data, out),
                None => match self.bound_channel(&target) {
                    Some(channel) => self.send_packet(target, channel, data, out),
                    None => debug!("Dropping packet, handler not connected"),
                },
            },
        }
    }

    fn bound_channel(&self, handler: &HandlerRef) -> Option<ChannelId> {
        match &self.bound {
            Some((bound, channel)) if bound == handler => *channel,
            _ => None,
        }
    }

    fn bind(&mut self, handler: HandlerRef, out: &mut Vec<DispatchAction>) {
        self.unbind(out);
        debug!(handler = %handler, "Binding NFC-F handler");
        self.bound = Some((handler.clone(), None));
        out.push(DispatchAction::Bind {
            handler,
            purpose: BindPurpose::Regular,
        });
    }

    fn unbind(&mut self, out: &mut Vec<DispatchAction>) {
        if let Some((handler, _)) = self.bound.take() {
            out.push(DispatchAction::Unbind {
                handler,
                purpose: BindPurpose::Regular,
            });
        }
    }

    fn send_packet(
        &mut self,
        handler: HandlerRef,
        channel: ChannelId,
        data: Vec<u8>,
        out: &mut Vec<DispatchAction>,
    ) {
        self.state = NfcFState::Transfer;
        if self.active.as_ref().map(|(_, c)| *c) != Some(channel) {
            self.deactivate_active(out);
            self.active = Some((handler.clone(), channel));
        }
        out.push(DispatchAction::command(channel, handler, data));
    }

    fn deactivate_active(&mut self, out: &mut Vec<DispatchAction>) {
        if let Some((handler, channel)) = self.active.take() {
            out.push(DispatchAction::deactivate(
                channel,
                handler,
                DeactivationReason::LinkLoss,
            ));
        }
    }

    fn on_connected(&mut self, handler: HandlerRef, channel: ChannelId, out: &mut Vec<DispatchAction>) {
        match self.bound.as_mut() {
            Some((bound, slot)) if bound == &handler => *slot = Some(channel),
            _ => {
                debug!(handler = %handler, "Ignoring connection for an unbound NFC-F handler");
                return;
            }
        }
        info!(handler = %handler, channel = %channel, "NFC-F handler connected");
        self.state = NfcFState::Transfer;
        if let Some(packet) = self.pending_packet.take() {
            self.send_packet(handler, channel, packet, out);
        }
    }

    fn on_response(&mut self, channel: ChannelId, data: Vec<u8>, out: &mut Vec<DispatchAction>) {
        if self.active.as_ref().map(|(_, c)| *c) != Some(channel) {
            debug!(channel = %channel, "Dropping response from inactive handler");
            return;
        }
        if let Err(e) = check_response(&data) {
            warn!(error = %e, "Dropping malformed NFC-F response");
            return;
        }
        if self.state == NfcFState::Transfer {
            out.push(DispatchAction::Reply { data });
        } else {
            debug!(state = %self.state, "Dropping NFC-F response in wrong state");
        }
    }

    fn tear_down(&mut self, forget_foreground: bool, out: &mut Vec<DispatchAction>) {
        self.deactivate_active(out);
        self.unbind(out);
        self.pending_packet = None;
        if forget_foreground {
            self.enabled_foreground = None;
        }
        self.state = NfcFState::Idle;
    }

    fn on_foreground_changed(&mut self, handler: Option<HandlerRef>, out: &mut Vec<DispatchAction>) {
        info!(handler = ?handler, "Enabled NFC-F foreground handler changed");
        let cleared = handler.is_none();
        self.enabled_foreground = handler;
        if cleared {
            self.deactivate_active(out);
            self.unbind(out);
        }
    }
}

impl Default for NfcFDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hce_resolver::{PreferredHandlers, ScopeTable};
    use hce_types::{AidMatchingMode, HandlerId, HandlerInfo, NfcFRegistration, UserId};
    use std::collections::BTreeMap;

    const NFCID2: [u8; 8] = [0x02, 0xFE, 0, 0, 0, 0, 0, 0x01];

    fn setup() -> (HandlerInfo, ResolutionSnapshot) {
        let h = HandlerInfo::new(HandlerId::new("com.felica", "F"), UserId(0)).with_nfcf(
            NfcFRegistration::new("4000", "02FE000000000001", "FFFFFFFFFFFFFFFF"),
        );
        let mut prefs = PreferredHandlers::new();
        prefs.set_nfcf_foreground(Some(h.handler_ref()));
        let mut sets = BTreeMap::new();
        sets.insert(UserId(0), vec![h.clone()]);
        let snapshot = ResolutionSnapshot::build(
            1,
            &sets,
            &ScopeTable::new(UserId(0)),
            &prefs,
            AidMatchingMode::ExactOrPrefix,
        );
        (h, snapshot)
    }

    fn packet() -> Vec<u8> {
        let mut p = vec![0x10, 0x06];
        p.extend_from_slice(&NFCID2);
        p.extend_from_slice(&[0x01, 0x09, 0x00, 0x01, 0x80, 0x00]);
        p
    }

    #[test]
    fn test_packet_nfcid2() {
        assert_eq!(packet_nfcid2(&packet()).unwrap(), Nfcid2(NFCID2));
        assert_eq!(packet_nfcid2(&[0; 4]), Err(DispatchError::PacketTooShort(4)));
    }

    #[test]
    fn test_response_length() {
        assert!(check_response(&[0x03, 0x07, 0x00]).is_ok());
        assert!(check_response(&[0x05, 0x07]).is_err());
        assert!(check_response(&[]).is_err());
    }

    #[test]
    fn test_packet_dropped_unless_foreground_enabled() {
        let (_, snapshot) = setup();
        let mut dispatcher = NfcFDispatcher::new();
        assert!(dispatcher
            .handle(NfcFEvent::Packet { data: packet() }, &snapshot)
            .is_empty());
    }

    #[test]
    fn test_bind_connect_transfer() {
        let (h, snapshot) = setup();
        let mut dispatcher = NfcFDispatcher::new();
        dispatcher.handle(
            NfcFEvent::ForegroundChanged {
                handler: Some(h.handler_ref()),
            },
            &snapshot,
        );

        let actions = dispatcher.handle(NfcFEvent::Packet { data: packet() }, &snapshot);
        assert_eq!(
            actions,
            vec![DispatchAction::Bind {
                handler: h.handler_ref(),
                purpose: BindPurpose::Regular
            }]
        );
        assert_eq!(dispatcher.state(), NfcFState::WaitHandler);

        let actions = dispatcher.handle(
            NfcFEvent::HandlerConnected {
                handler: h.handler_ref(),
                channel: ChannelId(1),
            },
            &snapshot,
        );
        assert_eq!(
            actions,
            vec![DispatchAction::command(ChannelId(1), h.handler_ref(), packet())]
        );

        let actions = dispatcher.handle(
            NfcFEvent::Response {
                channel: ChannelId(1),
                data: vec![0x03, 0x07, 0x00],
            },
            &snapshot,
        );
        assert_eq!(actions, vec![DispatchAction::reply([0x03, 0x07, 0x00])]);

        let actions = dispatcher.handle(
            NfcFEvent::Response {
                channel: ChannelId(1),
                data: vec![0x09, 0x07],
            },
            &snapshot,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_deactivation_sends_link_loss() {
        let (h, snapshot) = setup();
        let mut dispatcher = NfcFDispatcher::new();
        dispatcher.handle(
            NfcFEvent::ForegroundChanged {
                handler: Some(h.handler_ref()),
            },
            &snapshot,
        );
        dispatcher.handle(NfcFEvent::Packet { data: packet() }, &snapshot);
        dispatcher.handle(
            NfcFEvent::HandlerConnected {
                handler: h.handler_ref(),
                channel: ChannelId(1),
            },
            &snapshot,
        );

        let actions = dispatcher.handle(NfcFEvent::ControllerDisabled, &snapshot);
        assert_eq!(
            actions,
            vec![
                DispatchAction::deactivate(ChannelId(1), h.handler_ref(), DeactivationReason::LinkLoss),
                DispatchAction::Unbind {
                    handler: h.handler_ref(),
                    purpose: BindPurpose::Regular
                },
            ]
        );
        assert_eq!(dispatcher.state(), NfcFState::Idle);
        assert!(dispatcher.enabled_foreground().is_none());
    }
}
