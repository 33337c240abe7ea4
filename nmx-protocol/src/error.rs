//! Protocol error types and device return codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding NMP messages, CBOR bodies or
/// CoAP requests. All of them are fatal for the exchange that produced them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("incomplete NMP header: need {needed} more bytes")]
    IncompleteHeader { needed: usize },

    #[error("invalid NMP op: {0}")]
    InvalidOp(u8),

    #[error("NMP body length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("NMP body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error(
        "response header mismatch: expected op={expected_op} group={expected_group} id={expected_id}, \
         got op={actual_op} group={actual_group} id={actual_id}"
    )]
    HeaderMismatch {
        expected_op: u8,
        expected_group: u16,
        expected_id: u8,
        actual_op: u8,
        actual_group: u16,
        actual_id: u8,
    },

    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    #[error("CBOR body is not a map")]
    NotAMap,

    #[error("CBOR map key is not a text string")]
    NonTextKey,

    #[error("CBOR integer out of range")]
    IntegerOutOfRange,

    #[error("{0} trailing bytes after CBOR body")]
    TrailingBytes(usize),

    #[error("field {key:?} has wrong type: expected {expected}")]
    InvalidField { key: String, expected: &'static str },

    #[error("invalid token length: {0} (must be 1..=8)")]
    InvalidToken(usize),

    #[error("invalid resource path: {0:?}")]
    InvalidPath(String),

    #[error("malformed CoAP message: {0}")]
    MalformedCoap(&'static str),

    #[error("unsupported CoAP version: {0}")]
    UnsupportedCoapVersion(u8),
}

/// Return codes reported by a device in the `rc` field of a response.
///
/// A non-zero code is not a transmission failure: the exchange succeeded and
/// the device reported that the operation did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NmpErr {
    Ok,
    Unknown,
    NoMem,
    Inval,
    Timeout,
    NoEnt,
    BadState,
    MsgSize,
    NotSup,
    Corrupt,
}

impl NmpErr {
    /// Maps a raw `rc` value to a known code.
    pub fn from_rc(rc: i32) -> Option<Self> {
        let err = match rc {
            0 => NmpErr::Ok,
            1 => NmpErr::Unknown,
            2 => NmpErr::NoMem,
            3 => NmpErr::Inval,
            4 => NmpErr::Timeout,
            5 => NmpErr::NoEnt,
            6 => NmpErr::BadState,
            7 => NmpErr::MsgSize,
            8 => NmpErr::NotSup,
            9 => NmpErr::Corrupt,
            _ => return None,
        };
        Some(err)
    }

    pub fn rc(&self) -> i32 {
        *self as i32
    }

    pub fn is_ok(&self) -> bool {
        *self == NmpErr::Ok
    }
}

impl fmt::Display for NmpErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NmpErr::Ok => write!(f, "EOK"),
            NmpErr::Unknown => write!(f, "EUNKNOWN"),
            NmpErr::NoMem => write!(f, "ENOMEM"),
            NmpErr::Inval => write!(f, "EINVAL"),
            NmpErr::Timeout => write!(f, "ETIMEOUT"),
            NmpErr::NoEnt => write!(f, "ENOENT"),
            NmpErr::BadState => write!(f, "EBADSTATE"),
            NmpErr::MsgSize => write!(f, "EMSGSIZE"),
            NmpErr::NotSup => write!(f, "ENOTSUP"),
            NmpErr::Corrupt => write!(f, "ECORRUPT"),
        }
    }
}
