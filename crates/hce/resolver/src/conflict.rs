//! Conflict resolution between handlers claiming overlapping AIDs.

use hce_types::{Aid, Category, HandlerClaim, HandlerRef, PrefixConflict, ResolveEntry};
use tracing::{debug, trace};

use crate::index::AidIndex;
use crate::preferences::PreferredHandlers;

/// Preferred claims found in a claim set.
#[derive(Debug, Default)]
struct Preferred<'a> {
    foreground: Option<&'a HandlerClaim>,
    wallet: Vec<&'a HandlerClaim>,
    payment: Option<&'a HandlerClaim>,
}

impl Preferred<'_> {
    fn has_foreground(&self) -> bool {
        self.foreground.is_some()
    }

    fn has_wallet(&self) -> bool {
        !self.wallet.is_empty()
    }

    fn has_payment(&self) -> bool {
        self.payment.is_some()
    }
}

/// Picks candidates and a default for one AID or one AID family.
pub struct ConflictResolver<'a> {
    prefs: &'a PreferredHandlers,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(prefs: &'a PreferredHandlers) -> Self {
        Self { prefs }
    }

    pub fn preferences(&self) -> &PreferredHandlers {
        self.prefs
    }

    fn preferred<'c>(&self, claims: impl IntoIterator<Item = &'c HandlerClaim>) -> Preferred<'c> {
        let mut found = Preferred::default();
        for claim in claims {
            if self.prefs.is_foreground(&claim.handler) {
                found.foreground = Some(claim);
            } else if self.prefs.wallet_role_enabled() {
                if self.prefs.is_wallet_holder(&claim.handler) {
                    found.wallet.push(claim);
                }
            } else if self.prefs.is_payment_default(&claim.handler) && claim.is_payment() {
                found.payment = Some(claim);
            }
        }
        found
    }

    /// Resolve one claim set.
    ///
    /// Candidate order follows the claim order. The default is the foreground
    /// handler, else the alphabetically first wallet-role handler, else the
    /// payment default. With `promote_single` a lone candidate becomes default.
    pub fn resolve<'c, I>(&self, aid: &Aid, claims: I, promote_single: bool) -> ResolveEntry
    where
        I: IntoIterator<Item = &'c HandlerClaim>,
    {
        let mut entry = ResolveEntry::empty(aid.clone());
        let mut foreground: Option<HandlerRef> = None;
        let mut wallet: Vec<&HandlerClaim> = Vec::new();
        let mut payment: Option<HandlerRef> = None;

        for claim in claims {
            if self.prefs.is_foreground(&claim.handler) {
                entry.push_candidate(claim.clone());
                if claim.is_payment() {
                    entry.category = Category::Payment;
                }
                foreground = Some(claim.handler.clone());
            } else if self.prefs.wallet_role_enabled() {
                if self.prefs.is_wallet_holder(&claim.handler) {
                    entry.push_candidate(claim.clone());
                    if claim.is_payment() {
                        entry.category = Category::Payment;
                    }
                    wallet.push(claim);
                } else {
                    self.add_non_default(&mut entry, claim);
                }
            } else if self.prefs.is_payment_default(&claim.handler) && claim.is_payment() {
                entry.push_candidate(claim.clone());
                entry.category = Category::Payment;
                payment = Some(claim.handler.clone());
            } else {
                self.add_non_default(&mut entry, claim);
            }
        }

        let default = if foreground.is_some() {
            foreground
        } else if !wallet.is_empty() {
            wallet.sort_by_key(|c| c.handler.id.short_name().to_lowercase());
            wallet.first().map(|c| c.handler.clone())
        } else if payment.is_some() {
            payment
        } else if promote_single && entry.candidates().len() == 1 {
            entry.candidates().first().map(|c| c.handler.clone())
        } else {
            None
        };
        if let Some(default) = default {
            entry.set_default(&default);
        }
        trace!(entry = %entry, "Resolved AID");
        entry
    }

    fn add_non_default(&self, entry: &mut ResolveEntry, claim: &HandlerClaim) {
        if claim.is_payment() {
            trace!(handler = %claim.handler, aid = %claim.aid, "Skipping non-default payment claim");
            return;
        }
        if !claim.enabled {
            trace!(handler = %claim.handler, aid = %claim.aid, "Skipping disabled claim");
            return;
        }
        entry.push_candidate(claim.clone());
    }

    /// Resolve a prefix or subset root against the claims it overlaps.
    ///
    /// Returns an empty entry when a preferred handler lives only among the
    /// overlapping claims, so that those are resolved on their own.
    pub fn resolve_root(
        &self,
        index: &AidIndex,
        root: &Aid,
        root_claims: &[HandlerClaim],
        conflicts: &[&HandlerClaim],
    ) -> ResolveEntry {
        let root_pref = self.preferred(root_claims);
        let child_pref = self.preferred(conflicts.iter().copied());

        if root_pref.has_foreground() {
            return self.resolve_preferred_root(index, root, root_claims);
        }

        let yield_to_children = if self.prefs.wallet_role_enabled() {
            if root_pref.has_wallet() {
                if child_pref.has_foreground() {
                    true
                } else {
                    return self.resolve_preferred_root(index, root, root_claims);
                }
            } else {
                child_pref.has_foreground() || child_pref.has_wallet()
            }
        } else if root_pref.has_payment() {
            if child_pref.has_foreground() {
                true
            } else {
                return self.resolve_preferred_root(index, root, root_claims);
            }
        } else {
            child_pref.has_foreground() || child_pref.has_payment()
        };

        if yield_to_children {
            debug!(aid = %root, "Preferred handler found among overlapping AIDs");
            return ResolveEntry::empty(root.clone());
        }

        let mut entry = self.resolve(root, root_claims, conflicts.is_empty());
        if root.is_subset() {
            let handlers: Vec<HandlerRef> = conflicts
                .iter()
                .map(|c| c.handler.clone())
                .chain(root_claims.iter().map(|c| c.handler.clone()))
                .collect();
            entry.prefix_conflict = self.prefix_conflict(index, root, &handlers, false);
        }
        entry
    }

    fn resolve_preferred_root(
        &self,
        index: &AidIndex,
        root: &Aid,
        root_claims: &[HandlerClaim],
    ) -> ResolveEntry {
        let mut entry = self.resolve(root, root_claims, true);
        if root.is_subset() {
            let handlers: Vec<HandlerRef> = entry.default_handler().cloned().into_iter().collect();
            entry.prefix_conflict = self.prefix_conflict(index, root, &handlers, true);
        }
        entry
    }

    /// The lowest prefix registration of `handlers` covering the subset root.
    ///
    /// With `preferred_only`, a prefix counts only when it is a payment AID of
    /// its handler or the handler is in the foreground.
    pub fn prefix_conflict(
        &self,
        index: &AidIndex,
        subset: &Aid,
        handlers: &[HandlerRef],
        preferred_only: bool,
    ) -> Option<PrefixConflict> {
        let mut lowest: Option<&Aid> = None;
        for handler in handlers {
            for aid in index.aids_of(handler) {
                if !aid.is_prefix() || !subset.digits().starts_with(aid.digits()) {
                    continue;
                }
                if preferred_only {
                    let payment = index
                        .claim_of(handler, aid)
                        .is_some_and(HandlerClaim::is_payment);
                    if !payment && !self.prefs.is_foreground(handler) {
                        continue;
                    }
                }
                if lowest.map_or(true, |l| aid < l) {
                    lowest = Some(aid);
                }
            }
        }
        lowest.map(|aid| PrefixConflict {
            prefix_aid: aid.clone(),
            matching_subset: aid.digits() == subset.digits(),
        })
    }

    /// Pick one handler out of several polling-loop filter matches.
    pub fn resolve_polling_conflict(&self, handlers: &[HandlerRef]) -> Option<HandlerRef> {
        if let Some(fg) = handlers.iter().find(|h| self.prefs.is_foreground(h)) {
            return Some(fg.clone());
        }
        if self.prefs.wallet_role_enabled() {
            let mut wallet: Vec<&HandlerRef> = handlers
                .iter()
                .filter(|h| self.prefs.is_wallet_holder(h))
                .collect();
            wallet.sort_by_key(|h| h.id.short_name().to_lowercase());
            if let Some(first) = wallet.first() {
                return Some((*first).clone());
            }
        } else if let Some(pay) = handlers.iter().find(|h| self.prefs.is_payment_default(h)) {
            return Some(pay.clone());
        }
        handlers.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::WalletHolder;
    use hce_types::{AidMatchingMode, HandlerId, HandlerInfo, UserId};

    fn info(pkg: &str, class: &str) -> HandlerInfo {
        HandlerInfo::new(HandlerId::new(pkg, class), UserId(0))
    }

    fn claims(handlers: &[&HandlerInfo], aid: &str) -> (Aid, Vec<HandlerClaim>) {
        let index = AidIndex::build(handlers.iter().copied(), AidMatchingMode::ExactOrSubsetOrPrefix);
        let aid = Aid::parse(aid).unwrap();
        let claims = index.get(&aid).to_vec();
        (aid, claims)
    }

    #[test]
    fn test_single_claim_promoted() {
        let a = info("com.a", "A").with_aids(Category::Other, ["F0010203040506"]);
        let (aid, claims) = claims(&[&a], "F0010203040506");
        let prefs = PreferredHandlers::new();
        let resolver = ConflictResolver::new(&prefs);

        let entry = resolver.resolve(&aid, &claims, true);
        assert_eq!(entry.default_handler(), Some(&a.handler_ref()));

        let entry = resolver.resolve(&aid, &claims, false);
        assert_eq!(entry.default_handler(), None);
        assert_eq!(entry.candidates().len(), 1);
    }

    #[test]
    fn test_multiple_claims_no_default() {
        let a = info("com.a", "A").with_aids(Category::Other, ["F0010203040506"]);
        let b = info("com.b", "B").with_aids(Category::Other, ["F0010203040506"]);
        let (aid, claims) = claims(&[&a, &b], "F0010203040506");
        let prefs = PreferredHandlers::new();
        let entry = ConflictResolver::new(&prefs).resolve(&aid, &claims, true);
        assert_eq!(entry.default_handler(), None);
        assert_eq!(entry.handlers(), vec![a.handler_ref(), b.handler_ref()]);
    }

    #[test]
    fn test_foreground_wins() {
        let a = info("com.a", "A").with_aids(Category::Other, ["F0010203040506"]);
        let b = info("com.b", "B").with_aids(Category::Other, ["F0010203040506"]);
        let (aid, claims) = claims(&[&a, &b], "F0010203040506");
        let mut prefs = PreferredHandlers::new();
        prefs.set_foreground(Some(b.handler_ref()));
        let entry = ConflictResolver::new(&prefs).resolve(&aid, &claims, true);
        assert_eq!(entry.default_handler(), Some(&b.handler_ref()));
        assert_eq!(entry.category, Category::Other);
    }

    #[test]
    fn test_payment_default_and_non_default_payment_hidden() {
        let pay = info("com.pay", "Pay").with_aids(Category::Payment, ["A0000000041010"]);
        let other = info("com.other", "Pay").with_aids(Category::Payment, ["A0000000041010"]);
        let (aid, claims) = claims(&[&pay, &other], "A0000000041010");
        let mut prefs = PreferredHandlers::new();
        prefs.set_payment_default(Some(pay.handler_ref()));
        let entry = ConflictResolver::new(&prefs).resolve(&aid, &claims, true);
        assert_eq!(entry.handlers(), vec![pay.handler_ref()]);
        assert_eq!(entry.default_handler(), Some(&pay.handler_ref()));
        assert_eq!(entry.category, Category::Payment);
    }

    #[test]
    fn test_disabled_other_claims_skipped() {
        let a = info("com.a", "A")
            .with_aids(Category::Other, ["F0010203040506"])
            .with_other_enabled(false);
        let b = info("com.b", "B").with_aids(Category::Other, ["F0010203040506"]);
        let (aid, claims) = claims(&[&a, &b], "F0010203040506");
        let prefs = PreferredHandlers::new();
        let entry = ConflictResolver::new(&prefs).resolve(&aid, &claims, true);
        assert_eq!(entry.default_handler(), Some(&b.handler_ref()));
    }

    #[test]
    fn test_wallet_holder_sorted_by_name() {
        let w2 = info("com.wallet", "Zeta").with_aids(Category::Payment, ["A0000000041010"]);
        let w1 = info("com.wallet", "alpha").with_aids(Category::Payment, ["A0000000041010"]);
        let (aid, claims) = claims(&[&w2, &w1], "A0000000041010");
        let mut prefs = PreferredHandlers::new();
        prefs.set_wallet_role_enabled(true);
        prefs.set_wallet_holder(Some(WalletHolder {
            package: "com.wallet".into(),
            user: UserId(0),
        }));
        let entry = ConflictResolver::new(&prefs).resolve(&aid, &claims, true);
        assert_eq!(entry.candidates().len(), 2);
        assert_eq!(entry.default_handler(), Some(&w1.handler_ref()));
    }

    #[test]
    fn test_root_yields_to_foreground_child() {
        let root = info("com.a", "A").with_aids(Category::Other, ["F001020304*"]);
        let child = info("com.b", "B").with_aids(Category::Other, ["F0010203040506"]);
        let index = AidIndex::build([&root, &child], AidMatchingMode::ExactOrPrefix);
        let root_aid = Aid::parse("F001020304*").unwrap();
        let child_aid = Aid::parse("F0010203040506").unwrap();
        let conflicts: Vec<&HandlerClaim> = index.get(&child_aid).iter().collect();

        let mut prefs = PreferredHandlers::new();
        prefs.set_foreground(Some(child.handler_ref()));
        let resolver = ConflictResolver::new(&prefs);
        let entry = resolver.resolve_root(&index, &root_aid, index.get(&root_aid), &conflicts);
        assert!(entry.is_empty());

        let prefs = PreferredHandlers::new();
        let resolver = ConflictResolver::new(&prefs);
        let entry = resolver.resolve_root(&index, &root_aid, index.get(&root_aid), &conflicts);
        assert_eq!(entry.handlers(), vec![root.handler_ref()]);
        // overlapping claims exist, so the lone root candidate is not promoted here
        assert_eq!(entry.default_handler(), None);
    }

    #[test]
    fn test_subset_prefix_conflict() {
        let a = info("com.a", "A").with_aids(Category::Other, ["F0010203040506#"]);
        let b = info("com.b", "B").with_aids(Category::Other, ["F0010203040506*", "F001020304*"]);
        let index = AidIndex::build([&a, &b], AidMatchingMode::ExactOrSubsetOrPrefix);
        let prefs = PreferredHandlers::new();
        let resolver = ConflictResolver::new(&prefs);
        let subset = Aid::parse("F0010203040506#").unwrap();

        let conflict = resolver
            .prefix_conflict(&index, &subset, &[b.handler_ref()], false)
            .unwrap();
        assert_eq!(conflict.prefix_aid.as_str(), "F001020304*");
        assert!(!conflict.matching_subset);

        assert_eq!(
            resolver.prefix_conflict(&index, &subset, &[b.handler_ref()], true),
            None
        );
    }

    #[test]
    fn test_polling_conflict_order() {
        let a = HandlerRef::new(HandlerId::new("com.a", "A"), UserId(0));
        let b = HandlerRef::new(HandlerId::new("com.b", "B"), UserId(0));
        let mut prefs = PreferredHandlers::new();
        assert_eq!(
            ConflictResolver::new(&prefs).resolve_polling_conflict(&[a.clone(), b.clone()]),
            Some(a.clone())
        );
        prefs.set_payment_default(Some(b.clone()));
        assert_eq!(
            ConflictResolver::new(&prefs).resolve_polling_conflict(&[a.clone(), b.clone()]),
            Some(b.clone())
        );
        prefs.set_foreground(Some(a.clone()));
        assert_eq!(
            ConflictResolver::new(&prefs).resolve_polling_conflict(&[a.clone(), b]),
            Some(a)
        );
    }
}
