//! Inputs to the dispatch state machines.

use std::fmt;

use hce_resolver::PreferenceKind;
use hce_types::HandlerRef;
use serde::{Deserialize, Serialize};

use crate::polling::PollingFrame;

/// Transport-assigned id of one connection to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Which of the two handler connections a bind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindPurpose {
    /// Per-tap binding, dropped on deactivation.
    Regular,
    /// Long-lived binding to the payment default.
    Payment,
}

impl fmt::Display for BindPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindPurpose::Regular => f.write_str("regular"),
            BindPurpose::Payment => f.write_str("payment"),
        }
    }
}

/// Device conditions sampled when an event is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub locked: bool,
    pub screen_on: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            locked: false,
            screen_on: true,
        }
    }
}

/// Events driving the ISO-DEP dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// A reader activated the ISO-DEP link.
    Activated,
    /// A command APDU from the reader.
    Frame {
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    /// The link went away.
    Deactivated,
    /// The reader selected an AID routed to a secure element.
    OffHostAidSelected,
    PollingFrames { frames: Vec<PollingFrame> },
    /// The field-off grace period elapsed without new polling frames.
    FieldOffTimeout,
    HandlerConnected {
        handler: HandlerRef,
        channel: ChannelId,
        purpose: BindPurpose,
    },
    HandlerDisconnected {
        handler: HandlerRef,
        purpose: BindPurpose,
    },
    /// The handler process died; the binding must be re-established.
    BindingDied {
        handler: HandlerRef,
        purpose: BindPurpose,
    },
    /// A response APDU from a handler.
    Response {
        channel: ChannelId,
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    /// The handler declined the selected AID.
    Unhandled { channel: ChannelId },
    PreferenceChanged { kind: PreferenceKind },
}

impl HostEvent {
    pub fn frame(data: impl Into<Vec<u8>>) -> Self {
        HostEvent::Frame { data: data.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Activated => "activated",
            HostEvent::Frame { .. } => "frame",
            HostEvent::Deactivated => "deactivated",
            HostEvent::OffHostAidSelected => "off_host_aid_selected",
            HostEvent::PollingFrames { .. } => "polling_frames",
            HostEvent::FieldOffTimeout => "field_off_timeout",
            HostEvent::HandlerConnected { .. } => "handler_connected",
            HostEvent::HandlerDisconnected { .. } => "handler_disconnected",
            HostEvent::BindingDied { .. } => "binding_died",
            HostEvent::Response { .. } => "response",
            HostEvent::Unhandled { .. } => "unhandled",
            HostEvent::PreferenceChanged { .. } => "preference_changed",
        }
    }
}

/// Events driving the NFC-F dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NfcFEvent {
    Packet {
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    Deactivated,
    HandlerConnected {
        handler: HandlerRef,
        channel: ChannelId,
    },
    HandlerDisconnected { handler: HandlerRef },
    Response {
        channel: ChannelId,
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    /// The enabled foreground NFC-F handler changed.
    ForegroundChanged { handler: Option<HandlerRef> },
    ControllerDisabled,
    UserSwitched,
}
