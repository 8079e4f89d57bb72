//! AID resolution for host card emulation.
//!
//! Handler registrations are indexed by AID ([`AidIndex`]), overlapping claims
//! are settled by [`ConflictResolver`] using the user's preferences, and the
//! result is cached per AID in a [`ResolutionCache`]. A rebuild produces a new
//! [`ResolutionSnapshot`] that readers swap in atomically.

pub mod cache;
pub mod conflict;
pub mod index;
pub mod polling;
pub mod preferences;
pub mod snapshot;
pub mod t3t;

pub use cache::ResolutionCache;
pub use conflict::ConflictResolver;
pub use index::{AidIndex, RejectReason, RejectedClaim, ScopeTable};
pub use polling::{PollingFilterIndex, PollingFilterMatch};
pub use preferences::{PreferenceKind, PreferredHandlers, WalletHolder};
pub use snapshot::ResolutionSnapshot;
pub use t3t::T3tIdentifierCache;
