//! Resolution cache: AID → resolved ownership, rebuilt in two sweeps.
//!
//! The ascending sweep settles exact AIDs and prefix families, the descending
//! sweep then revisits subset roots, which may only be settled once every
//! shorter AID sharing their digits is known.

use std::collections::{BTreeMap, BTreeSet};

use hce_types::{Aid, AidKind, HandlerClaim, HandlerRef, ResolveEntry, MIN_AID_LEN};
use tracing::{debug, warn};

use crate::conflict::ConflictResolver;
use crate::index::AidIndex;
use crate::preferences::PreferredHandlers;

#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    entries: BTreeMap<Aid, ResolveEntry>,
    prefix_matching: bool,
    subset_matching: bool,
}

impl ResolutionCache {
    pub fn build(index: &AidIndex, prefs: &PreferredHandlers) -> Self {
        let resolver = ConflictResolver::new(prefs);
        let first = ascending_sweep(index, &resolver);
        let entries = descending_sweep(index, &resolver, first);
        debug!(entries = entries.len(), "Resolution cache rebuilt");
        Self {
            entries,
            prefix_matching: index.matching_mode().supports_prefix(),
            subset_matching: index.matching_mode().supports_subset(),
        }
    }

    pub fn get(&self, key: &Aid) -> Option<&ResolveEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResolveEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Who handles a SELECT for `aid` right now.
    ///
    /// Every cache entry covering the AID contributes its candidates. The most
    /// specific covering entry with candidates decides the default: exact
    /// first, then longer prefixes, then shorter subsets.
    pub fn resolve(&self, aid: &Aid) -> ResolveEntry {
        let selected = aid.plain();
        if selected.len_bytes() < MIN_AID_LEN {
            warn!(aid = %aid, "AID too short to resolve");
            return ResolveEntry::empty(selected);
        }

        let covering = self.covering(&selected);
        if let Some(child) = covering.iter().find(|e| !e.must_route) {
            let mut entry = (*child).clone();
            entry.aid = selected;
            return entry;
        }

        let mut resolved = ResolveEntry::empty(selected);
        // The most specific entry with candidates is authoritative, even
        // without a default: a covering entry must not lend it one.
        let authoritative = covering.iter().copied().find(|e| !e.is_empty());
        for entry in covering.iter() {
            for claim in entry.candidates() {
                resolved.push_candidate(claim.clone());
            }
        }
        if let Some(winner) = authoritative {
            if let Some(handler) = winner.default_handler() {
                resolved.set_default(handler);
            }
            resolved.category = winner.category;
        }
        resolved
    }

    fn covering(&self, selected: &Aid) -> Vec<&ResolveEntry> {
        let mut covering = Vec::new();
        if let Some(exact) = self.entries.get(selected) {
            covering.push(exact);
        }
        if !self.prefix_matching && !self.subset_matching {
            return covering;
        }

        if self.prefix_matching {
            let digits = selected.digits();
            let mut len = digits.len();
            while len >= MIN_AID_LEN * 2 {
                if let Ok(plain) = Aid::parse(&digits[..len]) {
                    if let Some(entry) = self.entries.get(&plain.with_kind(AidKind::Prefix)) {
                        covering.push(entry);
                    }
                }
                len -= 2;
            }
        }

        if self.subset_matching {
            let mut subsets: Vec<&ResolveEntry> = self
                .entries
                .range(selected.clone()..)
                .take_while(|(key, _)| key.as_str().starts_with(selected.digits()))
                .filter(|(key, _)| key.is_subset())
                .map(|(_, entry)| entry)
                .collect();
            subsets.sort_by_key(|e| e.aid.len_bytes());
            covering.extend(subsets);
        }
        covering
    }

    /// Whether `handler` would get a SELECT for `aid` without asking the user.
    pub fn is_default_handler_for_aid(&self, handler: &HandlerRef, aid: &Aid) -> bool {
        self.resolve(aid).sole_handler() == Some(handler)
    }

    /// One line per cache entry.
    pub fn dump(&self) -> Vec<String> {
        self.entries.values().map(ToString::to_string).collect()
    }
}

fn merged<'a>(root: &'a [HandlerClaim], child: &'a [HandlerClaim]) -> Vec<&'a HandlerClaim> {
    root.iter().chain(child.iter()).collect()
}

/// Whether AIDs under this root already reach the host through the root's row.
fn root_reaches_host(entry: &ResolveEntry) -> bool {
    entry.default_claim().map_or(true, HandlerClaim::is_on_host)
}

fn promote_single(entry: &mut ResolveEntry) {
    if entry.default_handler().is_none() && entry.candidates().len() == 1 {
        let only = entry.candidates()[0].handler.clone();
        entry.set_default(&only);
    }
}

fn ascending_sweep(index: &AidIndex, resolver: &ConflictResolver<'_>) -> BTreeMap<Aid, ResolveEntry> {
    let mut out = BTreeMap::new();
    let mut pending: BTreeSet<Aid> = index.keys().cloned().collect();

    while let Some(head) = pending.first().cloned() {
        let mut root = head;
        if root.is_exact() {
            let twin = root.with_kind(AidKind::Prefix);
            if pending.contains(&twin) {
                root = twin;
            }
        }
        let mut settled = vec![root.clone()];

        if root.is_prefix() {
            let root_claims = index.get(&root);
            let children: Vec<&Aid> = index
                .keys_under(root.digits())
                .into_iter()
                .filter(|k| **k != root)
                .collect();
            let conflicts: Vec<&HandlerClaim> =
                children.iter().flat_map(|c| index.get(c).iter()).collect();
            let mut entry = resolver.resolve_root(index, &root, root_claims, &conflicts);

            if let Some(default) = entry.default_handler().cloned() {
                settled.extend(children.iter().map(|c| (*c).clone()));
                let foreground = resolver.preferences().is_foreground(&default);
                for child in children.iter().filter(|c| c.is_subset()) {
                    let Some(own) = index.claim_of(&default, child) else {
                        continue;
                    };
                    if own.is_payment() || foreground {
                        out.insert(
                            (*child).clone(),
                            resolver.resolve(child, index.get(child), false),
                        );
                    }
                }
            } else if !entry.is_empty() {
                promote_single(&mut entry);
                let to_host = root_reaches_host(&entry);
                for child in &children {
                    let mut child_entry =
                        resolver.resolve(child, merged(root_claims, index.get(child)), false);
                    child_entry.must_route = !to_host;
                    out.insert((*child).clone(), child_entry);
                    settled.push((*child).clone());
                }
            }
            out.insert(root.clone(), entry);
        } else {
            let entry = resolver.resolve(&root, index.get(&root), true);
            out.insert(root.clone(), entry);
        }

        for aid in &settled {
            pending.remove(aid);
        }
    }
    out
}

fn descending_sweep(
    index: &AidIndex,
    resolver: &ConflictResolver<'_>,
    first: BTreeMap<Aid, ResolveEntry>,
) -> BTreeMap<Aid, ResolveEntry> {
    let mut out = BTreeMap::new();
    let mut pending: BTreeSet<Aid> = first.keys().cloned().collect();

    while let Some(head) = pending.last().cloned() {
        let mut root = head;
        if root.is_prefix() {
            let twin = root.with_kind(AidKind::Subset);
            if pending.contains(&twin) {
                root = twin;
            }
        }
        let mut settled = vec![root.clone()];

        if root.is_subset() {
            let root_claims = index.get(&root);
            let parents: Vec<&Aid> = index
                .keys_above(root.digits())
                .into_iter()
                .filter(|k| **k != root)
                .collect();
            let conflicts: Vec<&HandlerClaim> =
                parents.iter().flat_map(|p| index.get(p).iter()).collect();
            let mut entry = resolver.resolve_root(index, &root, root_claims, &conflicts);

            if entry.default_handler().is_some() {
                settled.extend(parents.iter().map(|p| (*p).clone()));
            } else if !entry.is_empty() {
                promote_single(&mut entry);
                let to_host = root_reaches_host(&entry);
                for parent in &parents {
                    let mut parent_entry =
                        resolver.resolve(parent, merged(root_claims, index.get(parent)), false);
                    parent_entry.must_route = !to_host;
                    out.insert((*parent).clone(), parent_entry);
                    settled.push((*parent).clone());
                }
            }
            if !entry.is_empty() {
                if let Some(conflict) = entry.prefix_conflict.as_ref().filter(|c| !c.matching_subset) {
                    let prefix = &conflict.prefix_aid;
                    out.insert(prefix.clone(), resolver.resolve(prefix, index.get(prefix), false));
                }
            }
            out.insert(root.clone(), entry);
        } else if let Some(entry) = first.get(&root) {
            out.insert(root.clone(), entry.clone());
        }

        for aid in &settled {
            pending.remove(aid);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hce_types::{AidMatchingMode, Category, HandlerId, HandlerInfo, UserId};

    fn info(pkg: &str, class: &str) -> HandlerInfo {
        HandlerInfo::new(HandlerId::new(pkg, class), UserId(0))
    }

    fn build(handlers: &[&HandlerInfo], mode: AidMatchingMode, prefs: &PreferredHandlers) -> ResolutionCache {
        let index = AidIndex::build(handlers.iter().copied(), mode);
        ResolutionCache::build(&index, prefs)
    }

    fn aid(s: &str) -> Aid {
        Aid::parse(s).unwrap()
    }

    #[test]
    fn test_exact_single_owner() {
        let a = info("com.a", "A").with_aids(Category::Other, ["F0010203040506"]);
        let cache = build(&[&a], AidMatchingMode::ExactOnly, &PreferredHandlers::new());
        let entry = cache.resolve(&aid("F0010203040506"));
        assert_eq!(entry.default_handler(), Some(&a.handler_ref()));
        assert!(cache.is_default_handler_for_aid(&a.handler_ref(), &aid("F0010203040506")));
        assert!(cache.resolve(&aid("F0010203040507")).is_empty());
    }

    #[test]
    fn test_prefix_root_with_exact_child() {
        let h1 = info("com.one", "H1").with_aids(Category::Other, ["F001020304*"]);
        let h2 = info("com.two", "H2").with_aids(Category::Other, ["F0010203040506"]);
        let cache = build(&[&h1, &h2], AidMatchingMode::ExactOrPrefix, &PreferredHandlers::new());

        let root = cache.get(&aid("F001020304*")).unwrap();
        assert_eq!(root.handlers(), vec![h1.handler_ref()]);
        assert_eq!(root.default_handler(), Some(&h1.handler_ref()));
        assert!(root.must_route);

        let child = cache.get(&aid("F0010203040506")).unwrap();
        assert_eq!(child.handlers(), vec![h1.handler_ref(), h2.handler_ref()]);
        assert_eq!(child.default_handler(), None);
        assert!(!child.must_route);

        let selected = cache.resolve(&aid("F0010203040506"));
        assert_eq!(selected.candidates().len(), 2);
        assert_eq!(selected.default_handler(), None);

        let other = cache.resolve(&aid("F0010203040599"));
        assert_eq!(other.default_handler(), Some(&h1.handler_ref()));
    }

    #[test]
    fn test_off_host_root_keeps_child_routed() {
        let se = info("com.se", "D")
            .with_aids(Category::Other, ["A000000003*"])
            .off_host("eSE1");
        let host = info("com.host", "H").with_aids(Category::Other, ["A0000000030102"]);
        let cache = build(&[&se, &host], AidMatchingMode::ExactOrPrefix, &PreferredHandlers::new());
        let child = cache.get(&aid("A0000000030102")).unwrap();
        assert!(child.must_route);
        assert_eq!(child.candidates().len(), 2);

        let selected = cache.resolve(&aid("A0000000030102"));
        assert_eq!(selected.handlers(), vec![se.handler_ref(), host.handler_ref()]);
        assert_eq!(selected.default_handler(), None);

        let sibling = cache.resolve(&aid("A0000000030999"));
        assert_eq!(sibling.default_handler(), Some(&se.handler_ref()));
    }

    #[test]
    fn test_foreground_prefix_takes_family() {
        let h1 = info("com.one", "H1").with_aids(Category::Other, ["F001020304*"]);
        let h2 = info("com.two", "H2").with_aids(Category::Other, ["F0010203040506"]);
        let mut prefs = PreferredHandlers::new();
        prefs.set_foreground(Some(h1.handler_ref()));
        let cache = build(&[&h1, &h2], AidMatchingMode::ExactOrPrefix, &prefs);

        assert!(cache.get(&aid("F0010203040506")).is_none());
        let selected = cache.resolve(&aid("F0010203040506"));
        assert_eq!(selected.default_handler(), Some(&h1.handler_ref()));
    }

    #[test]
    fn test_foreground_child_beats_root() {
        let h1 = info("com.one", "H1").with_aids(Category::Other, ["F001020304*"]);
        let h2 = info("com.two", "H2").with_aids(Category::Other, ["F0010203040506"]);
        let mut prefs = PreferredHandlers::new();
        prefs.set_foreground(Some(h2.handler_ref()));
        let cache = build(&[&h1, &h2], AidMatchingMode::ExactOrPrefix, &prefs);

        let root = cache.get(&aid("F001020304*")).unwrap();
        assert!(root.is_empty());
        let selected = cache.resolve(&aid("F0010203040506"));
        assert_eq!(selected.default_handler(), Some(&h2.handler_ref()));
    }

    #[test]
    fn test_exact_and_prefix_twin() {
        let a = info("com.a", "A").with_aids(Category::Other, ["F001020304"]);
        let b = info("com.b", "B").with_aids(Category::Other, ["F001020304*"]);
        let cache = build(&[&a, &b], AidMatchingMode::ExactOrPrefix, &PreferredHandlers::new());
        let selected = cache.resolve(&aid("F001020304"));
        assert_eq!(selected.candidates().len(), 2);
        assert_eq!(selected.default_handler(), None);
    }

    #[test]
    fn test_subset_root_against_shorter_exact() {
        let s = info("com.s", "S").with_aids(Category::Other, ["F0010203040506#"]);
        let e = info("com.e", "E").with_aids(Category::Other, ["F001020304"]);
        let cache = build(
            &[&s, &e],
            AidMatchingMode::ExactOrSubsetOrPrefix,
            &PreferredHandlers::new(),
        );
        let root = cache.get(&aid("F0010203040506#")).unwrap();
        assert_eq!(root.default_handler(), Some(&s.handler_ref()));
        let parent = cache.get(&aid("F001020304")).unwrap();
        assert!(!parent.must_route);
        assert_eq!(parent.candidates().len(), 2);
    }

    #[test]
    fn test_short_aid_resolves_empty() {
        let cache = ResolutionCache::default();
        let short = Aid::from_bytes(&[0xA0, 0x00, 0x00]);
        assert!(cache.resolve(&short).is_empty());
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let h1 = info("com.one", "H1").with_aids(Category::Other, ["F001020304*", "F0AABBCCDD"]);
        let h2 = info("com.two", "H2").with_aids(Category::Other, ["F0010203040506", "F0AABBCCDD"]);
        let prefs = PreferredHandlers::new();
        let a = build(&[&h1, &h2], AidMatchingMode::ExactOrPrefix, &prefs);
        let b = build(&[&h1, &h2], AidMatchingMode::ExactOrPrefix, &prefs);
        assert_eq!(a.dump(), b.dump());
    }
}
