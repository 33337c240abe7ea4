//! # nmx-protocol
//!
//! Wire formats for the newt management protocol.
//!
//! This crate provides:
//! - NMP framing (8-byte header + CBOR body)
//! - Typed request/response pairs with explicit wire-key mappings
//! - An ordered CBOR map codec
//! - OIC/CoAP resource request construction and message encoding
//! - Correlation counters for sequence numbers and tokens

pub mod cbor;
pub mod error;
pub mod message;
pub mod nmp;
pub mod oic;
pub mod seq;

pub use cbor::{CborMap, CborValue};
pub use error::{NmpErr, ProtocolError};
pub use message::{NmpReq, NmpRsp};
pub use nmp::{NmpHdr, NmpMsg, NmpOp, NMP_HDR_SIZE};
pub use oic::{CoapCode, CoapMessage, CoapRequest, Method};
pub use seq::{Correlators, SeqCounter, TokenCounter};

/// Default UDP port of the management service on a device.
pub const DEFAULT_UDP_PORT: u16 = 1337;
