//! ISO 7816-4 SELECT parsing and the canned status words.

use hce_types::{Aid, MIN_AID_LEN};
use tracing::debug;

use crate::error::{DispatchError, Result};

pub const SW_NOT_FOUND: [u8; 2] = [0x6A, 0x82];
pub const SW_UNKNOWN_ERROR: [u8; 2] = [0x6F, 0x00];

/// Platform discovery AID; answered without involving any handler.
pub const DISCOVERY_AID: &str = "A000000476416E64726F6964484345";
pub const DISCOVERY_RESPONSE: [u8; 6] = [0x14, 0x81, 0x00, 0x00, 0x90, 0x00];

/// NDEF tag applications. A miss on these is expected and not reported.
pub const NDEF_AIDS: [&str; 2] = ["D2760000850100", "D2760000850101"];

const CLA_ISO: u8 = 0x00;
const INS_SELECT: u8 = 0xA4;
const P1_SELECT_BY_NAME: u8 = 0x04;
const HEADER_LEN: usize = 5;
const MIN_SELECT_LEN: usize = 10;

/// Extract the AID of a SELECT-by-name command.
///
/// Returns `Ok(None)` for anything that is not a SELECT by name, including
/// one whose Lc is too short for an AID; those frames pass through unparsed.
/// A SELECT whose Lc runs past the end of the frame is an error.
pub fn parse_select(frame: &[u8]) -> Result<Option<Aid>> {
    if frame.len() < MIN_SELECT_LEN {
        return Ok(None);
    }
    if frame[0] != CLA_ISO || frame[1] != INS_SELECT || frame[2] != P1_SELECT_BY_NAME {
        return Ok(None);
    }
    if frame[3] != 0x00 {
        debug!(p2 = frame[3], "Selecting next, last or previous occurrence is not supported");
    }
    let declared = frame[4] as usize;
    if declared < MIN_AID_LEN {
        debug!(lc = declared, "SELECT too short to carry an AID, passing through");
        return Ok(None);
    }
    let available = frame.len() - HEADER_LEN;
    if available < declared {
        return Err(DispatchError::TruncatedSelect {
            declared,
            available,
        });
    }
    Ok(Some(Aid::from_bytes(
        &frame[HEADER_LEN..HEADER_LEN + declared],
    )))
}

pub fn is_discovery_aid(aid: &Aid) -> bool {
    aid.as_str() == DISCOVERY_AID
}

pub fn is_ndef_aid(aid: &Aid) -> bool {
    NDEF_AIDS.contains(&aid.as_str())
}

/// Build a SELECT-by-name command for `aid`.
pub fn select_command(aid: &Aid) -> Vec<u8> {
    let bytes = aid.to_bytes();
    let mut out = Vec::with_capacity(HEADER_LEN + bytes.len() + 1);
    out.extend_from_slice(&[CLA_ISO, INS_SELECT, P1_SELECT_BY_NAME, 0x00, bytes.len() as u8]);
    out.extend_from_slice(&bytes);
    out.push(0x00);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select() {
        let aid = Aid::parse("A0000000031010").unwrap();
        let frame = select_command(&aid);
        assert_eq!(parse_select(&frame).unwrap(), Some(aid));
    }

    #[test]
    fn test_non_select_passes_through() {
        let read_binary = [0x00, 0xB0, 0x00, 0x00, 0x0F, 0, 0, 0, 0, 0];
        assert_eq!(parse_select(&read_binary).unwrap(), None);
        assert_eq!(parse_select(&[0x00, 0xA4, 0x04]).unwrap(), None);
    }

    #[test]
    fn test_truncated_select() {
        let frame = [0x00, 0xA4, 0x04, 0x00, 0x10, 0xA0, 0x00, 0x00, 0x00, 0x03];
        assert_eq!(
            parse_select(&frame),
            Err(DispatchError::TruncatedSelect {
                declared: 16,
                available: 5
            })
        );
    }

    #[test]
    fn test_short_lc_select_passes_through() {
        let empty = [0x00, 0xA4, 0x04, 0x00, 0x00, 0, 0, 0, 0, 0];
        assert_eq!(parse_select(&empty).unwrap(), None);
        let short = [0x00, 0xA4, 0x04, 0x00, 0x04, 0xA0, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(parse_select(&short).unwrap(), None);
        let minimal = [0x00, 0xA4, 0x04, 0x00, 0x05, 0xA0, 0x00, 0x00, 0x00, 0x03];
        assert!(parse_select(&minimal).unwrap().is_some());
    }

    #[test]
    fn test_select_with_p2_still_parses() {
        let mut frame = select_command(&Aid::parse("A0000000031010").unwrap());
        frame[3] = 0x02;
        assert!(parse_select(&frame).unwrap().is_some());
    }

    #[test]
    fn test_reserved_aids() {
        assert!(is_discovery_aid(&Aid::parse(DISCOVERY_AID).unwrap()));
        assert!(is_ndef_aid(&Aid::parse("D2760000850101").unwrap()));
        assert!(!is_ndef_aid(&Aid::parse("D2760000850102").unwrap()));
    }
}
