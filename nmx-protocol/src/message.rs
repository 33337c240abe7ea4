//! Typed NMP requests and responses.
//!
//! Each request type names its op, group and id and lists the wire keys of its
//! fields in [`NmpReq::to_wire_mapping`]; its paired response type parses the
//! same keys back in [`NmpRsp::from_wire_mapping`].

use crate::cbor::CborMap;
use crate::error::ProtocolError;
use crate::nmp::{group, id, NmpMsg, NmpOp};

/// A typed NMP request bound to its response type.
pub trait NmpReq {
    type Rsp: NmpRsp;

    const OP: NmpOp;
    const GROUP: u16;
    const ID: u8;

    fn to_wire_mapping(&self) -> CborMap;

    /// Builds the wire message for this request with the given sequence number.
    fn msg(&self, seq: u8) -> NmpMsg {
        NmpMsg::new(Self::OP, Self::GROUP, Self::ID, seq).with_body(self.to_wire_mapping())
    }
}

/// A typed NMP response.
pub trait NmpRsp: Sized {
    fn from_wire_mapping(map: &CborMap) -> Result<Self, ProtocolError>;

    /// Device-reported return code.
    fn rc(&self) -> i32;
}

/// Decodes `rsp` as the response to `req`, rejecting a response whose op,
/// group or id does not belong to the request.
pub fn decode_rsp<R: NmpReq>(req: &NmpMsg, rsp: &NmpMsg) -> Result<R::Rsp, ProtocolError> {
    req.hdr.check_rsp(&rsp.hdr)?;
    R::Rsp::from_wire_mapping(&rsp.body)
}

fn rc_field(map: &CborMap) -> Result<i32, ProtocolError> {
    match map.get_int("rc")? {
        None => Ok(0),
        Some(rc) => i32::try_from(rc).map_err(|_| ProtocolError::InvalidField {
            key: "rc".to_string(),
            expected: "32-bit integer",
        }),
    }
}

fn text_field(map: &CborMap, key: &str) -> Result<String, ProtocolError> {
    Ok(map.get_text(key)?.unwrap_or_default().to_string())
}

// ============================================================================
// Default group
// ============================================================================

/// Echo request: the device returns `payload` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoReq {
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoRsp {
    pub payload: String,
    pub rc: i32,
}

impl NmpReq for EchoReq {
    type Rsp = EchoRsp;

    const OP: NmpOp = NmpOp::Write;
    const GROUP: u16 = group::DEFAULT;
    const ID: u8 = id::DEF_ECHO;

    fn to_wire_mapping(&self) -> CborMap {
        CborMap::new().with("d", self.payload.as_str())
    }
}

impl NmpRsp for EchoRsp {
    fn from_wire_mapping(map: &CborMap) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: text_field(map, "r")?,
            rc: rc_field(map)?,
        })
    }

    fn rc(&self) -> i32 {
        self.rc
    }
}

/// Reset request. Carries no fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReq;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetRsp {
    pub rc: i32,
}

impl NmpReq for ResetReq {
    type Rsp = ResetRsp;

    const OP: NmpOp = NmpOp::Write;
    const GROUP: u16 = group::DEFAULT;
    const ID: u8 = id::DEF_RESET;

    fn to_wire_mapping(&self) -> CborMap {
        CborMap::new()
    }
}

impl NmpRsp for ResetRsp {
    fn from_wire_mapping(map: &CborMap) -> Result<Self, ProtocolError> {
        Ok(Self {
            rc: rc_field(map)?,
        })
    }

    fn rc(&self) -> i32 {
        self.rc
    }
}

// ============================================================================
// Pepp group
// ============================================================================

/// Test-pep request: echo handled by the per-user pepp group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPepReq {
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPepRsp {
    pub payload: String,
    pub rc: i32,
}

impl NmpReq for TestPepReq {
    type Rsp = TestPepRsp;

    const OP: NmpOp = NmpOp::Write;
    const GROUP: u16 = group::PEPP;
    const ID: u8 = id::DEF_ECHO;

    fn to_wire_mapping(&self) -> CborMap {
        CborMap::new().with("d", self.payload.as_str())
    }
}

impl NmpRsp for TestPepRsp {
    fn from_wire_mapping(map: &CborMap) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: text_field(map, "r")?,
            rc: rc_field(map)?,
        })
    }

    fn rc(&self) -> i32 {
        self.rc
    }
}
