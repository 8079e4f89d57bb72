//! Routing destinations, power states, routing rows and controller capabilities.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::aid::{Aid, AidKind};
use crate::handler::{ExecutionLocation, SecureElementRef};

/// NCI identifier of an execution environment on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NfceeId(pub u8);

/// Destination of a routing row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[default]
    Host,
    Nfcee(NfceeId),
}

impl Route {
    pub const HOST_ID: u8 = 0x00;

    pub fn id(self) -> u8 {
        match self {
            Route::Host => Self::HOST_ID,
            Route::Nfcee(NfceeId(id)) => id,
        }
    }

    pub fn from_id(id: u8) -> Self {
        if id == Self::HOST_ID {
            Route::Host
        } else {
            Route::Nfcee(NfceeId(id))
        }
    }

    pub fn is_host(self) -> bool {
        self == Route::Host
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Host => f.write_str("host"),
            Route::Nfcee(NfceeId(id)) => write!(f, "nfcee 0x{:02X}", id),
        }
    }
}

/// Device power/lock states in which a routing row stays active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PowerState(u8);

impl PowerState {
    pub const SWITCH_ON: Self = Self(0x01);
    pub const SWITCH_OFF: Self = Self(0x02);
    pub const BATTERY_OFF: Self = Self(0x04);
    pub const SCREEN_OFF_UNLOCKED: Self = Self(0x08);
    pub const SCREEN_ON_LOCKED: Self = Self(0x10);
    pub const SCREEN_OFF_LOCKED: Self = Self(0x20);

    pub const ALL: Self = Self(0x3F);
    /// Controllers before NCI 2.0 only distinguish the switch and battery states.
    pub const ALL_NCI_1_0: Self = Self(0x07);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for PowerState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PowerState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Matching qualifier bits carried in the routing row type byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AidQualifier {
    pub prefix: bool,
    pub subset: bool,
}

impl AidQualifier {
    pub const PREFIX_BIT: u8 = 0x10;
    pub const SUBSET_BIT: u8 = 0x20;

    pub fn for_kind(kind: AidKind) -> Self {
        Self {
            prefix: kind == AidKind::Prefix,
            subset: kind == AidKind::Subset,
        }
    }

    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.prefix {
            bits |= Self::PREFIX_BIT;
        }
        if self.subset {
            bits |= Self::SUBSET_BIT;
        }
        bits
    }
}

/// One AID-based entry of the controller routing table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingRow {
    /// Cache key the row was built from; the modifier is not sent on the wire.
    pub aid: Aid,
    pub route: Route,
    pub power: PowerState,
    pub qualifier: AidQualifier,
}

impl RoutingRow {
    /// NCI routing entry type for AID-based routing.
    pub const TYPE_AID: u8 = 0x02;
    /// Type, length, route and power octets preceding the AID.
    pub const HEADER_LEN: usize = 4;

    /// Encoded size of this row in controller table bytes.
    pub fn cost(&self) -> usize {
        self.aid.len_bytes() + Self::HEADER_LEN
    }

    /// Append the TLV encoding of this row.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let aid = self.aid.to_bytes();
        out.push(Self::TYPE_AID | self.qualifier.bits());
        out.push((aid.len() + 2) as u8);
        out.push(self.route.id());
        out.push(self.power.bits());
        out.extend_from_slice(&aid);
    }
}

impl fmt::Display for RoutingRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (power {}, qualifier 0x{:02X})",
            self.aid,
            self.route,
            self.power,
            self.qualifier.bits()
        )
    }
}

/// AID matching capability reported by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AidMatchingMode {
    ExactOnly,
    #[default]
    ExactOrPrefix,
    PrefixOnly,
    ExactOrSubsetOrPrefix,
}

impl AidMatchingMode {
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(AidMatchingMode::ExactOnly),
            1 => Some(AidMatchingMode::ExactOrPrefix),
            2 => Some(AidMatchingMode::PrefixOnly),
            3 => Some(AidMatchingMode::ExactOrSubsetOrPrefix),
            _ => None,
        }
    }

    pub fn supports_prefix(self) -> bool {
        !matches!(self, AidMatchingMode::ExactOnly)
    }

    pub fn supports_subset(self) -> bool {
        matches!(self, AidMatchingMode::ExactOrSubsetOrPrefix)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NciVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[default]
    #[serde(rename = "2.0")]
    V2_0,
}

/// What the controller reported about its routing abilities at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerCapabilities {
    pub matching_mode: AidMatchingMode,
    pub nci_version: NciVersion,
    /// Routing table capacity in bytes.
    pub max_routing_table_size: usize,
    /// Destination of AIDs without an explicit row.
    pub default_route: Route,
    /// Destination for off-host handlers naming an unknown secure element.
    pub default_off_host_route: Route,
    pub off_host_routes: BTreeMap<SecureElementRef, Route>,
}

impl Default for ControllerCapabilities {
    fn default() -> Self {
        Self {
            matching_mode: AidMatchingMode::default(),
            nci_version: NciVersion::default(),
            max_routing_table_size: 256,
            default_route: Route::Host,
            default_off_host_route: Route::Nfcee(NfceeId(0x80)),
            off_host_routes: BTreeMap::new(),
        }
    }
}

impl ControllerCapabilities {
    pub fn supports_prefix(&self) -> bool {
        self.matching_mode.supports_prefix()
    }

    pub fn supports_subset(&self) -> bool {
        self.matching_mode.supports_subset()
    }

    /// Routing destination for a handler execution location.
    pub fn route_for(&self, location: &ExecutionLocation) -> Route {
        match location {
            ExecutionLocation::OnHost => Route::Host,
            ExecutionLocation::OffHost(se) => self
                .off_host_routes
                .get(se)
                .copied()
                .unwrap_or(self.default_off_host_route),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_encoding_and_cost() {
        let row = RoutingRow {
            aid: Aid::parse("A000000003*").unwrap(),
            route: Route::Nfcee(NfceeId(0x82)),
            power: PowerState::SWITCH_ON | PowerState::SCREEN_OFF_UNLOCKED,
            qualifier: AidQualifier::for_kind(AidKind::Prefix),
        };
        let mut out = Vec::new();
        row.encode(&mut out);
        assert_eq!(
            out,
            vec![0x12, 0x07, 0x82, 0x09, 0xA0, 0x00, 0x00, 0x00, 0x03]
        );
        assert_eq!(row.cost(), out.len());
    }

    #[test]
    fn test_power_state_ops() {
        let power = PowerState::ALL.without(PowerState::BATTERY_OFF);
        assert!(!power.contains(PowerState::BATTERY_OFF));
        assert!(power.contains(PowerState::SCREEN_ON_LOCKED));
        assert_eq!(PowerState::from_bits(0xFF), PowerState::ALL);
    }

    #[test]
    fn test_matching_mode_capabilities() {
        assert!(!AidMatchingMode::ExactOnly.supports_prefix());
        assert!(AidMatchingMode::PrefixOnly.supports_prefix());
        assert!(!AidMatchingMode::ExactOrPrefix.supports_subset());
        assert!(AidMatchingMode::ExactOrSubsetOrPrefix.supports_subset());
        assert_eq!(AidMatchingMode::from_raw(2), Some(AidMatchingMode::PrefixOnly));
        assert_eq!(AidMatchingMode::from_raw(9), None);
    }

    #[test]
    fn test_route_for_location() {
        let mut caps = ControllerCapabilities::default();
        caps.off_host_routes
            .insert(SecureElementRef::new("SIM1"), Route::Nfcee(NfceeId(0x81)));
        assert_eq!(caps.route_for(&ExecutionLocation::OnHost), Route::Host);
        assert_eq!(
            caps.route_for(&ExecutionLocation::OffHost(SecureElementRef::new("SIM1"))),
            Route::Nfcee(NfceeId(0x81))
        );
        assert_eq!(
            caps.route_for(&ExecutionLocation::OffHost(SecureElementRef::new("eSE9"))),
            Route::Nfcee(NfceeId(0x80))
        );
    }
}
