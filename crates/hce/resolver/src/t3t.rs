//! NFCID2 → handler lookup for NFC-F traffic.

use std::collections::BTreeMap;

use hce_types::{HandlerInfo, HandlerRef, Nfcid2, T3tIdentifier};
use tracing::{debug, warn};

/// Only the handler currently enabled for NFC-F is reachable.
#[derive(Debug, Clone, Default)]
pub struct T3tIdentifierCache {
    by_nfcid2: BTreeMap<Nfcid2, (HandlerRef, T3tIdentifier)>,
}

impl T3tIdentifierCache {
    pub fn build<'a, I>(handlers: I, enabled: Option<&HandlerRef>) -> Self
    where
        I: IntoIterator<Item = &'a HandlerInfo>,
    {
        let mut cache = Self::default();
        let Some(enabled) = enabled else {
            return cache;
        };
        for info in handlers {
            if &info.handler_ref() != enabled {
                continue;
            }
            let Some(registration) = &info.nfcf else {
                continue;
            };
            match registration.identifier() {
                Ok(Some(id)) => {
                    debug!(handler = %enabled, identifier = %id, "NFC-F identifier registered");
                    cache.by_nfcid2.insert(id.nfcid2, (enabled.clone(), id));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(handler = %enabled, error = %e, "Ignoring malformed NFC-F registration");
                }
            }
        }
        cache
    }

    pub fn resolve(&self, nfcid2: &Nfcid2) -> Option<&HandlerRef> {
        self.by_nfcid2.get(nfcid2).map(|(handler, _)| handler)
    }

    pub fn identifiers(&self) -> Vec<T3tIdentifier> {
        self.by_nfcid2.values().map(|(_, id)| *id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nfcid2.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hce_types::{HandlerId, NfcFRegistration, UserId};

    fn info(class: &str, nfcid2: &str) -> HandlerInfo {
        HandlerInfo::new(HandlerId::new("com.example", class), UserId(0)).with_nfcf(
            NfcFRegistration::new("4000", nfcid2, "FFFFFFFFFFFFFFFF"),
        )
    }

    #[test]
    fn test_only_enabled_handler_resolves() {
        let a = info("A", "02FE000000000001");
        let b = info("B", "02FE000000000002");
        let cache = T3tIdentifierCache::build([&a, &b], Some(&a.handler_ref()));
        let id = Nfcid2::parse("02FE000000000001").unwrap();
        assert_eq!(cache.resolve(&id), Some(&a.handler_ref()));
        assert_eq!(cache.resolve(&Nfcid2::parse("02FE000000000002").unwrap()), None);
        assert_eq!(cache.identifiers().len(), 1);
    }

    #[test]
    fn test_nothing_enabled() {
        let a = info("A", "02FE000000000001");
        let cache = T3tIdentifierCache::build([&a], None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unset_and_malformed_skipped() {
        let a = info("A", "NULL");
        let b = info("B", "02FE");
        assert!(T3tIdentifierCache::build([&a], Some(&a.handler_ref())).is_empty());
        assert!(T3tIdentifierCache::build([&b], Some(&b.handler_ref())).is_empty());
    }
}
