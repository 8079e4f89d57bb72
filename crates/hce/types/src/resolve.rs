use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aid::Aid;
use crate::handler::{Category, HandlerClaim, HandlerRef};

/// A prefix registration that overlaps a subset root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixConflict {
    pub prefix_aid: Aid,
    /// The prefix has exactly the subset's digits, so one row carries both qualifiers.
    pub matching_subset: bool,
}

/// Authoritative answer to "who handles this AID now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveEntry {
    pub aid: Aid,
    /// Candidate claims in resolution order, at most one per handler.
    candidates: Vec<HandlerClaim>,
    default: Option<HandlerRef>,
    pub category: Category,
    /// `false` when a conflicting parent row already sends this AID to the host.
    pub must_route: bool,
    pub prefix_conflict: Option<PrefixConflict>,
}

impl ResolveEntry {
    pub fn empty(aid: Aid) -> Self {
        Self {
            aid,
            candidates: Vec::new(),
            default: None,
            category: Category::Other,
            must_route: true,
            prefix_conflict: None,
        }
    }

    /// Append a candidate unless its handler is already present.
    pub fn push_candidate(&mut self, claim: HandlerClaim) -> bool {
        if self.contains(&claim.handler) {
            return false;
        }
        self.candidates.push(claim);
        true
    }

    pub fn candidates(&self) -> &[HandlerClaim] {
        &self.candidates
    }

    pub fn contains(&self, handler: &HandlerRef) -> bool {
        self.candidates.iter().any(|c| &c.handler == handler)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn default_handler(&self) -> Option<&HandlerRef> {
        self.default.as_ref()
    }

    /// Set the default; refused unless the handler is one of the candidates.
    pub fn set_default(&mut self, handler: &HandlerRef) -> bool {
        if !self.contains(handler) {
            return false;
        }
        self.default = Some(handler.clone());
        true
    }

    pub fn clear_default(&mut self) {
        self.default = None;
    }

    pub fn default_claim(&self) -> Option<&HandlerClaim> {
        let default = self.default.as_ref()?;
        self.candidates.iter().find(|c| &c.handler == default)
    }

    /// The default, or the only candidate when there is exactly one.
    pub fn sole_handler(&self) -> Option<&HandlerRef> {
        match (&self.default, self.candidates.as_slice()) {
            (Some(default), _) => Some(default),
            (None, [only]) => Some(&only.handler),
            _ => None,
        }
    }

    pub fn handlers(&self) -> Vec<HandlerRef> {
        self.candidates.iter().map(|c| c.handler.clone()).collect()
    }
}

impl fmt::Display for ResolveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.aid)?;
        for (i, claim) in self.candidates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", claim.handler)?;
        }
        f.write_str("]")?;
        if let Some(default) = &self.default {
            write!(f, " default={}", default)?;
        }
        write!(f, " category={} must_route={}", self.category, self.must_route)?;
        if let Some(prefix) = &self.prefix_conflict {
            write!(
                f,
                " prefix={} matching_subset={}",
                prefix.prefix_aid, prefix.matching_subset
            )?;
        }
        Ok(())
    }
}
