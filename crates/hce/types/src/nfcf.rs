//! NFC-F (Type 3 Tag) identifiers.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

/// Literal used by handlers to leave an identifier unset.
pub const UNSET_IDENTIFIER: &str = "NULL";

pub const NFCID2_LEN: usize = 8;
pub const PMM_LEN: usize = 8;

fn parse_fixed<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], IdentifierError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out).map_err(|_| IdentifierError::Malformed {
        field,
        value: value.to_string(),
        expected: N * 2,
    })?;
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemCode(pub u16);

impl SystemCode {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let bytes = parse_fixed::<2>("system code", value)?;
        Ok(Self(u16::from_be_bytes(bytes)))
    }
}

impl fmt::Display for SystemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nfcid2(pub [u8; NFCID2_LEN]);

impl Nfcid2 {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        parse_fixed::<NFCID2_LEN>("NFCID2", value).map(Self)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; NFCID2_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for Nfcid2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pmm(pub [u8; PMM_LEN]);

impl Pmm {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        parse_fixed::<PMM_LEN>("PMm", value).map(Self)
    }
}

impl fmt::Display for Pmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// A registered T3T identity.
///
/// Equality covers system code and NFCID2 only; a PMm change alone does not
/// make a new registration.
#[derive(Debug, Clone, Copy)]
pub struct T3tIdentifier {
    pub system_code: SystemCode,
    pub nfcid2: Nfcid2,
    pub pmm: Pmm,
}

impl PartialEq for T3tIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.system_code == other.system_code && self.nfcid2 == other.nfcid2
    }
}

impl Eq for T3tIdentifier {}

impl Hash for T3tIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system_code.hash(state);
        self.nfcid2.hash(state);
    }
}

impl fmt::Display for T3tIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.system_code, self.nfcid2, self.pmm)
    }
}

/// NFC-F registration as declared by a handler, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfcFRegistration {
    #[serde(default = "default_unset")]
    pub system_code: String,
    #[serde(default = "default_unset")]
    pub nfcid2: String,
    #[serde(default = "default_pmm")]
    pub pmm: String,
}

fn default_unset() -> String {
    UNSET_IDENTIFIER.to_string()
}

fn default_pmm() -> String {
    "FFFFFFFFFFFFFFFF".to_string()
}

impl NfcFRegistration {
    pub fn new(
        system_code: impl Into<String>,
        nfcid2: impl Into<String>,
        pmm: impl Into<String>,
    ) -> Self {
        Self {
            system_code: system_code.into(),
            nfcid2: nfcid2.into(),
            pmm: pmm.into(),
        }
    }

    /// The T3T identifier, or `None` when system code or NFCID2 is left unset.
    pub fn identifier(&self) -> Result<Option<T3tIdentifier>, IdentifierError> {
        if self.system_code.eq_ignore_ascii_case(UNSET_IDENTIFIER)
            || self.nfcid2.eq_ignore_ascii_case(UNSET_IDENTIFIER)
        {
            return Ok(None);
        }
        Ok(Some(T3tIdentifier {
            system_code: SystemCode::parse(&self.system_code)?,
            nfcid2: Nfcid2::parse(&self.nfcid2)?,
            pmm: Pmm::parse(&self.pmm)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parsing() {
        let reg = NfcFRegistration::new("4000", "02FE000000000001", "FFFFFFFFFFFFFFFF");
        let id = reg.identifier().unwrap().unwrap();
        assert_eq!(id.system_code, SystemCode(0x4000));
        assert_eq!(id.nfcid2.to_string(), "02FE000000000001");
    }

    #[test]
    fn test_unset_identifier_yields_none() {
        let reg = NfcFRegistration::new("NULL", "02FE000000000001", "FFFFFFFFFFFFFFFF");
        assert_eq!(reg.identifier().unwrap(), None);
        let reg = NfcFRegistration::new("4000", "null", "FFFFFFFFFFFFFFFF");
        assert_eq!(reg.identifier().unwrap(), None);
    }

    #[test]
    fn test_malformed_identifier() {
        let reg = NfcFRegistration::new("40", "02FE000000000001", "FFFFFFFFFFFFFFFF");
        assert!(matches!(
            reg.identifier(),
            Err(IdentifierError::Malformed { expected: 4, .. })
        ));
    }

    #[test]
    fn test_equality_ignores_pmm() {
        let a = NfcFRegistration::new("4000", "02FE000000000001", "0000000000000000")
            .identifier()
            .unwrap()
            .unwrap();
        let b = NfcFRegistration::new("4000", "02FE000000000001", "FFFFFFFFFFFFFFFF")
            .identifier()
            .unwrap()
            .unwrap();
        assert_eq!(a, b);
    }
}
