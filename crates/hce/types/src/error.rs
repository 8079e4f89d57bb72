use thiserror::Error;

/// Errors raised while parsing AID literals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AidError {
    #[error("AID literal is empty")]
    Empty,

    #[error("AID {0} contains non-hex characters")]
    NotHex(String),

    #[error("AID {aid} has {digits} hex digits; expected an even count between 10 and 32")]
    BadLength { aid: String, digits: usize },
}

/// Errors raised while parsing NFC-F (Type 3 Tag) identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("invalid {field} {value}: expected {expected} hex digits")]
    Malformed {
        field: &'static str,
        value: String,
        expected: usize,
    },
}
