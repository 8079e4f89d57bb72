use thiserror::Error;

/// Malformed frames seen by the dispatchers.
///
/// None of these abort a session; the dispatcher logs them and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("SELECT declares a {declared}-byte AID but only {available} bytes follow the header")]
    TruncatedSelect { declared: usize, available: usize },

    #[error("NFC-F packet is {0} bytes; at least 10 are needed to carry an NFCID2")]
    PacketTooShort(usize),

    #[error("NFC-F response length byte says {declared} but the packet is {actual} bytes")]
    ResponseLengthMismatch { declared: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
