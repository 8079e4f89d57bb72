//! Raw AID → claiming handlers index.
//!
//! Rebuilt from scratch on every handler-set change. Claims that cannot be
//! routed are dropped here and reported as [`RejectedClaim`] diagnostics.

use std::collections::BTreeMap;
use std::ops::Bound;

use hce_types::{
    Aid, AidError, AidKind, AidMatchingMode, HandlerClaim, HandlerInfo, HandlerRef, UserId,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a registered literal did not make it into the index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("invalid AID: {0}")]
    Invalid(#[from] AidError),

    #[error("controller does not support prefix AIDs")]
    PrefixUnsupported,

    #[error("controller does not support subset AIDs")]
    SubsetUnsupported,

    #[error("already covered by the handler's own registration {0}")]
    Subsumed(Aid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedClaim {
    pub handler: HandlerRef,
    pub literal: String,
    pub reason: RejectReason,
}

/// Current user plus the profile-parent relation between users.
///
/// Handler sets of a user are visible when that user's profile parent is the
/// current user (a user is its own parent unless told otherwise).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeTable {
    current: UserId,
    parents: BTreeMap<UserId, UserId>,
}

impl ScopeTable {
    pub fn new(current: UserId) -> Self {
        Self {
            current,
            parents: BTreeMap::new(),
        }
    }

    pub fn with_profile(mut self, profile: UserId, parent: UserId) -> Self {
        self.parents.insert(profile, parent);
        self
    }

    pub fn current(&self) -> UserId {
        self.current
    }

    pub fn set_current(&mut self, user: UserId) {
        self.current = user;
    }

    pub fn set_profile_parent(&mut self, profile: UserId, parent: UserId) {
        self.parents.insert(profile, parent);
    }

    pub fn parent_of(&self, user: UserId) -> UserId {
        self.parents.get(&user).copied().unwrap_or(user)
    }

    pub fn is_visible(&self, user: UserId) -> bool {
        self.parent_of(user) == self.current
    }

    /// Handlers of every visible user, in user order.
    pub fn visible<'a>(&self, sets: &'a BTreeMap<UserId, Vec<HandlerInfo>>) -> Vec<&'a HandlerInfo> {
        sets.iter()
            .filter(|(user, _)| self.is_visible(**user))
            .flat_map(|(_, handlers)| handlers.iter())
            .collect()
    }
}

/// AID → claims, keyed by the canonical literal so that sorted iteration
/// visits a root before every longer AID sharing its digits.
#[derive(Debug, Clone, Default)]
pub struct AidIndex {
    mode: AidMatchingMode,
    claims: BTreeMap<Aid, Vec<HandlerClaim>>,
    by_handler: BTreeMap<HandlerRef, Vec<Aid>>,
    rejected: Vec<RejectedClaim>,
}

impl AidIndex {
    pub fn build<'a, I>(handlers: I, mode: AidMatchingMode) -> Self
    where
        I: IntoIterator<Item = &'a HandlerInfo>,
    {
        let mut index = Self {
            mode,
            ..Default::default()
        };
        for info in handlers {
            index.insert_handler(info);
        }
        debug!(
            aids = index.claims.len(),
            rejected = index.rejected.len(),
            "AID index rebuilt"
        );
        index
    }

    fn insert_handler(&mut self, info: &HandlerInfo) {
        let handler = info.handler_ref();
        let prefixes = if self.mode.supports_prefix() {
            info.aids_of_kind(AidKind::Prefix)
        } else {
            Vec::new()
        };
        let subsets = if self.mode.supports_subset() {
            info.aids_of_kind(AidKind::Subset)
        } else {
            Vec::new()
        };

        for (literal, category) in info.aid_literals() {
            let aid = match self.admit(literal, &prefixes, &subsets) {
                Ok(aid) => aid,
                Err(reason) => {
                    warn!(
                        handler = %handler,
                        aid = literal,
                        reason = %reason,
                        "Dropping AID registration"
                    );
                    self.rejected.push(RejectedClaim {
                        handler: handler.clone(),
                        literal: literal.to_string(),
                        reason,
                    });
                    continue;
                }
            };
            let claim = HandlerClaim::from_handler(info, aid.clone(), category);
            let claims = self.claims.entry(aid.clone()).or_default();
            if claims.iter().any(|c| c.handler == handler) {
                continue;
            }
            claims.push(claim);
            self.by_handler.entry(handler.clone()).or_default().push(aid);
        }
    }

    fn admit(&self, literal: &str, prefixes: &[Aid], subsets: &[Aid]) -> Result<Aid, RejectReason> {
        let aid = Aid::parse(literal)?;
        match aid.kind() {
            AidKind::Prefix if !self.mode.supports_prefix() => Err(RejectReason::PrefixUnsupported),
            AidKind::Subset if !self.mode.supports_subset() => Err(RejectReason::SubsetUnsupported),
            AidKind::Exact => {
                if let Some(prefix) = prefixes
                    .iter()
                    .find(|p| aid.digits().starts_with(p.digits()))
                {
                    return Err(RejectReason::Subsumed(prefix.clone()));
                }
                if let Some(subset) = subsets
                    .iter()
                    .find(|s| s.digits().starts_with(aid.digits()))
                {
                    return Err(RejectReason::Subsumed(subset.clone()));
                }
                Ok(aid)
            }
            _ => Ok(aid),
        }
    }

    pub fn matching_mode(&self) -> AidMatchingMode {
        self.mode
    }

    pub fn get(&self, aid: &Aid) -> &[HandlerClaim] {
        self.claims.get(aid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, aid: &Aid) -> bool {
        self.claims.contains_key(aid)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Aid> {
        self.claims.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Aid, &[HandlerClaim])> {
        self.claims.iter().map(|(aid, claims)| (aid, claims.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn rejected(&self) -> &[RejectedClaim] {
        &self.rejected
    }

    /// Every key whose digits start with `digits`, in ascending order.
    pub fn keys_under(&self, digits: &str) -> Vec<&Aid> {
        let Ok(start) = Aid::parse(digits) else {
            return Vec::new();
        };
        self.claims
            .range((Bound::Included(start), Bound::Unbounded))
            .map(|(aid, _)| aid)
            .take_while(|aid| aid.as_str().starts_with(digits))
            .collect()
    }

    /// Every key whose digits are a prefix of `digits` (the key itself included).
    pub fn keys_above(&self, digits: &str) -> Vec<&Aid> {
        let mut keys = Vec::new();
        let mut len = hce_types::MIN_AID_LEN * 2;
        while len <= digits.len() {
            let Ok(plain) = Aid::parse(&digits[..len]) else {
                break;
            };
            for kind in [AidKind::Exact, AidKind::Subset, AidKind::Prefix] {
                let key = plain.with_kind(kind);
                if let Some((aid, _)) = self.claims.get_key_value(&key) {
                    keys.push(aid);
                }
            }
            len += 2;
        }
        keys.sort();
        keys
    }

    /// AIDs the given handler holds in the index.
    pub fn aids_of(&self, handler: &HandlerRef) -> &[Aid] {
        self.by_handler.get(handler).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The handler's own claim on `aid`, if any.
    pub fn claim_of(&self, handler: &HandlerRef, aid: &Aid) -> Option<&HandlerClaim> {
        self.get(aid).iter().find(|c| &c.handler == handler)
    }
}
