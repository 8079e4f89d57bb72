//! Immutable, versioned view published after every rebuild.

use std::collections::BTreeMap;

use hce_types::{Aid, AidMatchingMode, HandlerInfo, HandlerRef, Nfcid2, ResolveEntry, UserId};

use crate::cache::ResolutionCache;
use crate::conflict::ConflictResolver;
use crate::index::{AidIndex, RejectedClaim, ScopeTable};
use crate::polling::{PollingFilterIndex, PollingFilterMatch};
use crate::preferences::PreferredHandlers;
use crate::t3t::T3tIdentifierCache;

/// Everything the dispatcher reads while handling one event.
///
/// Readers hold an `Arc` of a snapshot and never observe a half-built one.
#[derive(Debug, Clone, Default)]
pub struct ResolutionSnapshot {
    pub version: u64,
    pub cache: ResolutionCache,
    pub preferences: PreferredHandlers,
    pub polling: PollingFilterIndex,
    pub t3t: T3tIdentifierCache,
    pub rejected: Vec<RejectedClaim>,
    handlers: BTreeMap<HandlerRef, HandlerInfo>,
}

impl ResolutionSnapshot {
    /// Build a snapshot from the handler sets of every user.
    pub fn build(
        version: u64,
        sets: &BTreeMap<UserId, Vec<HandlerInfo>>,
        scopes: &ScopeTable,
        preferences: &PreferredHandlers,
        mode: AidMatchingMode,
    ) -> Self {
        let visible = scopes.visible(sets);
        let index = AidIndex::build(visible.iter().copied(), mode);
        let cache = ResolutionCache::build(&index, preferences);
        let polling = PollingFilterIndex::build(visible.iter().copied());
        let t3t = T3tIdentifierCache::build(visible.iter().copied(), preferences.nfcf_foreground());
        let handlers = visible
            .iter()
            .map(|info| (info.handler_ref(), (*info).clone()))
            .collect();
        Self {
            version,
            cache,
            preferences: preferences.clone(),
            polling,
            t3t,
            rejected: index.rejected().to_vec(),
            handlers,
        }
    }

    pub fn resolve(&self, aid: &Aid) -> ResolveEntry {
        self.cache.resolve(aid)
    }

    pub fn is_default_handler_for_aid(&self, handler: &HandlerRef, aid: &Aid) -> bool {
        self.cache.is_default_handler_for_aid(handler, aid)
    }

    pub fn handler(&self, handler: &HandlerRef) -> Option<&HandlerInfo> {
        self.handlers.get(handler)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &HandlerInfo> {
        self.handlers.values()
    }

    /// Foreground handler, else payment default.
    pub fn preferred_handler(&self) -> Option<&HandlerRef> {
        self.preferences.preferred_handler()
    }

    pub fn payment_default(&self) -> Option<&HandlerRef> {
        self.preferences.payment_default()
    }

    pub fn polling_matches(&self, frame_hex: &str) -> Vec<PollingFilterMatch> {
        self.polling.matches(frame_hex)
    }

    pub fn resolve_polling_conflict(&self, handlers: &[HandlerRef]) -> Option<HandlerRef> {
        ConflictResolver::new(&self.preferences).resolve_polling_conflict(handlers)
    }

    pub fn resolve_nfcid2(&self, nfcid2: &Nfcid2) -> Option<&HandlerRef> {
        self.t3t.resolve(nfcid2)
    }
}
