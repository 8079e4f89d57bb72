//! APDU and NFC-F dispatch for host card emulation.
//!
//! Both dispatchers are pure state machines. Each event is handled against
//! the current [`hce_resolver::ResolutionSnapshot`] and yields a list of
//! [`DispatchAction`]s for the caller to execute; nothing here performs I/O.
//!
//! - [`HostDispatcher`]: ISO-DEP sessions, SELECT routing, handler binding,
//!   disambiguation and the polling loop
//! - [`NfcFDispatcher`]: NFC-F packets routed by NFCID2

pub mod action;
pub mod apdu;
pub mod error;
pub mod event;
pub mod host;
pub mod nfcf;
pub mod polling;

pub use action::{DeactivationReason, DispatchAction, HandlerMessage};
pub use apdu::{parse_select, select_command, SW_NOT_FOUND, SW_UNKNOWN_ERROR};
pub use error::{DispatchError, Result};
pub use event::{BindPurpose, ChannelId, DeviceState, HostEvent, NfcFEvent};
pub use host::{HostDispatcher, HostOptions, HostState};
pub use nfcf::{NfcFDispatcher, NfcFState};
pub use polling::{PollingFrame, PollingFrameKind, PollingLoopState, FIELD_OFF_IDLE_DELAY};
