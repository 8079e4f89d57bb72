//! Shared data model for the host card emulation engine.
//!
//! ## Contents
//!
//! - [`Aid`]: canonical AID literals with exact, prefix (`*`) and subset (`#`) matching
//! - [`HandlerInfo`] / [`HandlerClaim`]: handler descriptions and the per-AID claims
//!   derived from them
//! - [`ResolveEntry`]: resolved ownership of one AID
//! - [`RoutingRow`], [`PowerState`], [`Route`]: controller routing table entries
//! - [`ControllerCapabilities`]: what the controller reported at startup
//! - [`T3tIdentifier`]: NFC-F registrations

pub mod aid;
pub mod error;
pub mod handler;
pub mod nfcf;
pub mod resolve;
pub mod routing;

pub use aid::{Aid, AidKind, MAX_AID_LEN, MIN_AID_LEN};
pub use error::{AidError, IdentifierError};
pub use handler::{
    AidGroup, Category, ExecutionLocation, HandlerClaim, HandlerId, HandlerInfo, HandlerRef,
    PollingLoopFilter, SecureElementRef, UserId,
};
pub use nfcf::{NfcFRegistration, Nfcid2, Pmm, SystemCode, T3tIdentifier, NFCID2_LEN};
pub use resolve::{PrefixConflict, ResolveEntry};
pub use routing::{
    AidMatchingMode, AidQualifier, ControllerCapabilities, NciVersion, NfceeId, PowerState, Route,
    RoutingRow,
};
