//! Handler descriptions and the per-AID claims derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aid::{Aid, AidKind};
use crate::nfcf::NfcFRegistration;

/// Owner scope of a handler (an execution context such as a user profile).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a handler implementation: owning package plus class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId {
    pub package: String,
    pub class: String,
}

impl HandlerId {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// `package/class`, used for deterministic tie-breaks.
    pub fn short_name(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

/// A handler identity scoped to its owning user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerRef {
    pub id: HandlerId,
    pub user: UserId,
}

impl HandlerRef {
    pub fn new(id: HandlerId, user: UserId) -> Self {
        Self { id, user }
    }

    pub fn package(&self) -> &str {
        &self.id.package
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.user)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Payment,
    #[default]
    Other,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Payment => f.write_str("payment"),
            Category::Other => f.write_str("other"),
        }
    }
}

/// Name of an offline secure element, e.g. `eSE1` or `SIM1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecureElementRef(pub String);

impl SecureElementRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for SecureElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a handler executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLocation {
    #[default]
    OnHost,
    OffHost(SecureElementRef),
}

impl ExecutionLocation {
    pub fn is_on_host(&self) -> bool {
        matches!(self, ExecutionLocation::OnHost)
    }

    pub fn secure_element(&self) -> Option<&SecureElementRef> {
        match self {
            ExecutionLocation::OnHost => None,
            ExecutionLocation::OffHost(se) => Some(se),
        }
    }
}

/// A group of AID literals registered under one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidGroup {
    #[serde(default)]
    pub category: Category,
    pub aids: Vec<String>,
}

impl AidGroup {
    pub fn new<I, S>(category: Category, aids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category,
            aids: aids.into_iter().map(Into::into).collect(),
        }
    }
}

/// A polling-loop frame filter registered by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingLoopFilter {
    /// Uppercase hex of the frame payload, or a regular expression over it.
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
    /// Release observe mode for one transaction when this filter matches.
    #[serde(default)]
    pub auto_transact: bool,
}

/// Description of one handler as reported by the handler directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub id: HandlerId,
    #[serde(default)]
    pub user: UserId,
    #[serde(default)]
    pub location: ExecutionLocation,
    #[serde(default)]
    pub requires_unlock: bool,
    #[serde(default)]
    pub requires_screen_on: bool,
    /// Whether the user has enabled this handler for category OTHER AIDs.
    #[serde(default = "default_true")]
    pub other_enabled: bool,
    #[serde(default)]
    pub aid_groups: Vec<AidGroup>,
    /// Groups registered at runtime; they replace static groups of the same category.
    #[serde(default)]
    pub dynamic_aid_groups: Vec<AidGroup>,
    #[serde(default)]
    pub polling_filters: Vec<PollingLoopFilter>,
    #[serde(default)]
    pub nfcf: Option<NfcFRegistration>,
}

fn default_true() -> bool {
    true
}

impl HandlerInfo {
    pub fn new(id: HandlerId, user: UserId) -> Self {
        Self {
            id,
            user,
            location: ExecutionLocation::OnHost,
            requires_unlock: false,
            requires_screen_on: false,
            other_enabled: true,
            aid_groups: Vec::new(),
            dynamic_aid_groups: Vec::new(),
            polling_filters: Vec::new(),
            nfcf: None,
        }
    }

    pub fn with_aids<I, S>(mut self, category: Category, aids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aid_groups.push(AidGroup::new(category, aids));
        self
    }

    pub fn off_host(mut self, se: impl Into<String>) -> Self {
        self.location = ExecutionLocation::OffHost(SecureElementRef::new(se));
        self
    }

    pub fn requiring_unlock(mut self) -> Self {
        self.requires_unlock = true;
        self
    }

    pub fn requiring_screen_on(mut self) -> Self {
        self.requires_screen_on = true;
        self
    }

    pub fn with_other_enabled(mut self, enabled: bool) -> Self {
        self.other_enabled = enabled;
        self
    }

    pub fn with_polling_filter(mut self, pattern: impl Into<String>, regex: bool) -> Self {
        self.polling_filters.push(PollingLoopFilter {
            pattern: pattern.into(),
            regex,
            auto_transact: false,
        });
        self
    }

    pub fn with_nfcf(mut self, registration: NfcFRegistration) -> Self {
        self.nfcf = Some(registration);
        self
    }

    pub fn handler_ref(&self) -> HandlerRef {
        HandlerRef::new(self.id.clone(), self.user)
    }

    pub fn is_on_host(&self) -> bool {
        self.location.is_on_host()
    }

    /// AID groups in effect: a dynamic group shadows the static group of its category.
    pub fn effective_groups(&self) -> impl Iterator<Item = &AidGroup> {
        let dynamic = &self.dynamic_aid_groups;
        self.aid_groups
            .iter()
            .filter(move |g| !dynamic.iter().any(|d| d.category == g.category))
            .chain(dynamic.iter())
    }

    /// Every registered literal paired with the category of its group.
    pub fn aid_literals(&self) -> impl Iterator<Item = (&str, Category)> {
        self.effective_groups()
            .flat_map(|g| g.aids.iter().map(move |a| (a.as_str(), g.category)))
    }

    /// Parsed literals of one matching kind; invalid literals are skipped.
    pub fn aids_of_kind(&self, kind: AidKind) -> Vec<Aid> {
        self.aid_literals()
            .filter_map(|(literal, _)| Aid::parse(literal).ok())
            .filter(|aid| aid.kind() == kind)
            .collect()
    }

    pub fn category_for_aid(&self, aid: &Aid) -> Category {
        self.aid_literals()
            .find(|(literal, _)| literal.eq_ignore_ascii_case(aid.as_str()))
            .map(|(_, category)| category)
            .unwrap_or_default()
    }
}

/// One (handler, AID, category) triple with the handler's routing metadata.
///
/// Claims are rebuilt wholesale from [`HandlerInfo`] on every handler-set
/// change and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerClaim {
    pub handler: HandlerRef,
    pub aid: Aid,
    pub category: Category,
    pub location: ExecutionLocation,
    pub requires_unlock: bool,
    pub requires_screen_on: bool,
    /// Category OTHER enablement of the owning handler.
    pub enabled: bool,
}

impl HandlerClaim {
    pub fn from_handler(info: &HandlerInfo, aid: Aid, category: Category) -> Self {
        Self {
            handler: info.handler_ref(),
            aid,
            category,
            location: info.location.clone(),
            requires_unlock: info.requires_unlock,
            requires_screen_on: info.requires_screen_on,
            enabled: info.other_enabled,
        }
    }

    pub fn is_payment(&self) -> bool {
        self.category == Category::Payment
    }

    pub fn is_on_host(&self) -> bool {
        self.location.is_on_host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> HandlerInfo {
        HandlerInfo::new(HandlerId::new("com.example.wallet", "PayService"), UserId(0))
            .with_aids(Category::Payment, ["A0000000041010", "A000000003*"])
            .with_aids(Category::Other, ["F00102030405"])
    }

    #[test]
    fn test_aid_literals_carry_group_category() {
        let info = wallet();
        let literals: Vec<_> = info.aid_literals().collect();
        assert_eq!(literals.len(), 3);
        assert_eq!(
            info.category_for_aid(&Aid::parse("a0000000041010").unwrap()),
            Category::Payment
        );
        assert_eq!(
            info.category_for_aid(&Aid::parse("F00102030405").unwrap()),
            Category::Other
        );
    }

    #[test]
    fn test_dynamic_group_replaces_static_category() {
        let mut info = wallet();
        info.dynamic_aid_groups
            .push(AidGroup::new(Category::Other, ["F0AABBCCDD"]));
        let literals: Vec<_> = info.aid_literals().map(|(a, _)| a).collect();
        assert!(literals.contains(&"F0AABBCCDD"));
        assert!(!literals.contains(&"F00102030405"));
        assert!(literals.contains(&"A0000000041010"));
    }

    #[test]
    fn test_aids_of_kind() {
        let info = wallet();
        let prefixes = info.aids_of_kind(AidKind::Prefix);
        assert_eq!(prefixes, vec![Aid::parse("A000000003*").unwrap()]);
        assert!(info.aids_of_kind(AidKind::Subset).is_empty());
    }

    #[test]
    fn test_claim_copies_handler_metadata() {
        let info = wallet().off_host("eSE1").requiring_unlock();
        let claim = HandlerClaim::from_handler(
            &info,
            Aid::parse("A0000000041010").unwrap(),
            Category::Payment,
        );
        assert!(claim.is_payment());
        assert!(!claim.is_on_host());
        assert!(claim.requires_unlock);
        assert_eq!(claim.handler.to_string(), "com.example.wallet/PayService@0");
    }

    #[test]
    fn test_handler_info_json_defaults() {
        let json = r#"{
            "id": {"package": "com.example.transit", "class": "Card"},
            "location": {"off_host": "SIM1"},
            "aid_groups": [{"aids": ["F0010203040506"]}]
        }"#;
        let info: HandlerInfo = serde_json::from_str(json).unwrap();
        assert!(info.other_enabled);
        assert_eq!(info.user, UserId(0));
        assert_eq!(
            info.location,
            ExecutionLocation::OffHost(SecureElementRef::new("SIM1"))
        );
        assert_eq!(info.aid_groups[0].category, Category::Other);
    }
}
