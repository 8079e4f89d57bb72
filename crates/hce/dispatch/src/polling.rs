//! Polling-loop frames observed before any SELECT.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Quiet period after a field-off frame before the dispatcher returns to idle.
pub const FIELD_OFF_IDLE_DELAY: Duration = Duration::from_millis(2000);

/// Pending frames needed before the batch is evaluated.
const EVALUATION_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingFrameKind {
    On,
    Off,
    A,
    B,
    F,
    /// Vendor or proprietary polling; matched against polling-loop filters.
    Unknown,
}

impl fmt::Display for PollingFrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollingFrameKind::On => "on",
            PollingFrameKind::Off => "off",
            PollingFrameKind::A => "a",
            PollingFrameKind::B => "b",
            PollingFrameKind::F => "f",
            PollingFrameKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingFrame {
    pub kind: PollingFrameKind,
    #[serde(default, with = "hex")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub timestamp_us: u64,
    /// Set when this frame released observe mode through an auto-transact filter.
    #[serde(default)]
    pub triggered_auto_transact: bool,
}

impl PollingFrame {
    pub fn new(kind: PollingFrameKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
            timestamp_us: 0,
            triggered_auto_transact: false,
        }
    }

    pub fn of_kind(kind: PollingFrameKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Uppercase hex of the payload, the form polling-loop filters are written in.
    pub fn data_hex(&self) -> String {
        hex::encode_upper(&self.data)
    }
}

/// How frames of the current polling loop are being handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingLoopState {
    /// Collecting frames until the loop looks like a reader.
    #[default]
    Evaluating,
    /// A polling-loop filter claimed the field.
    FilterMatched,
    /// Frames go to the preferred handler as they arrive.
    DeliveringToPreferred,
}

impl fmt::Display for PollingLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollingLoopState::Evaluating => write!(f, "evaluating"),
            PollingLoopState::FilterMatched => write!(f, "filter-matched"),
            PollingLoopState::DeliveringToPreferred => write!(f, "delivering-to-preferred"),
        }
    }
}

/// Whether the pending frames look like a reader polling for a card.
///
/// More than three type A or type B polls, or at least two field on/off
/// cycles, are enough.
pub fn looks_like_reader(pending: &[PollingFrame]) -> bool {
    if pending.len() < EVALUATION_THRESHOLD {
        return false;
    }
    let (mut on, mut off, mut a, mut b) = (0usize, 0usize, 0usize, 0usize);
    for frame in pending {
        match frame.kind {
            PollingFrameKind::A => a += 1,
            PollingFrameKind::B => b += 1,
            PollingFrameKind::On => on += 1,
            PollingFrameKind::Off => off += 1,
            _ => {}
        }
        if a > 3 || b > 3 || (frame.kind == PollingFrameKind::Off && on >= 2 && off >= 2) {
            return true;
        }
    }
    false
}
