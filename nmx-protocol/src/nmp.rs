//! NMP message framing.
//!
//! Message layout (8 bytes header + CBOR body):
//!
//! ```text
//! +--------+--------+----------+----------+--------+--------+
//! |   op   | flags  | body_len | group_id |  seq   |   id   |
//! | 1 byte | 1 byte | 2 bytes  | 2 bytes  | 1 byte | 1 byte |
//! +--------+--------+----------+----------+--------+--------+
//! | body (CBOR map)                                         |
//! | body_len bytes                                          |
//! +---------------------------------------------------------+
//! ```

use crate::cbor::{self, CborMap};
use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Size of the fixed NMP header in bytes (1+1+2+2+1+1 = 8).
pub const NMP_HDR_SIZE: usize = 8;

/// Largest body the 16-bit length field can describe.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// NMP operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NmpOp {
    Read = 0,
    ReadRsp = 1,
    Write = 2,
    WriteRsp = 3,
}

impl NmpOp {
    pub fn from_u8(op: u8) -> Result<Self, ProtocolError> {
        match op {
            0 => Ok(NmpOp::Read),
            1 => Ok(NmpOp::ReadRsp),
            2 => Ok(NmpOp::Write),
            3 => Ok(NmpOp::WriteRsp),
            other => Err(ProtocolError::InvalidOp(other)),
        }
    }

    /// Returns the op a response to this request carries.
    pub fn rsp(&self) -> NmpOp {
        match self {
            NmpOp::Read | NmpOp::ReadRsp => NmpOp::ReadRsp,
            NmpOp::Write | NmpOp::WriteRsp => NmpOp::WriteRsp,
        }
    }

    pub fn is_rsp(&self) -> bool {
        matches!(self, NmpOp::ReadRsp | NmpOp::WriteRsp)
    }
}

/// Management groups.
pub mod group {
    pub const DEFAULT: u16 = 0;
    pub const IMAGE: u16 = 1;
    pub const STAT: u16 = 2;
    pub const CONFIG: u16 = 3;
    pub const LOG: u16 = 4;
    pub const CRASH: u16 = 5;
    pub const RUN: u16 = 7;
    pub const FS: u16 = 8;
    /// First per-user group; hosts the test-pep echo handler.
    pub const PEPP: u16 = 64;
}

/// Command ids within [`group::DEFAULT`].
pub mod id {
    pub const DEF_ECHO: u8 = 0;
    pub const DEF_CONS_ECHO_CTRL: u8 = 1;
    pub const DEF_TASKSTAT: u8 = 2;
    pub const DEF_MPSTAT: u8 = 3;
    pub const DEF_DATETIME_STR: u8 = 4;
    pub const DEF_RESET: u8 = 5;
}

/// A parsed NMP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmpHdr {
    pub op: NmpOp,
    /// Reserved, sent as zero.
    pub flags: u8,
    /// Body length in bytes.
    pub len: u16,
    pub group: u16,
    pub seq: u8,
    pub id: u8,
}

impl NmpHdr {
    pub fn new(op: NmpOp, group: u16, id: u8, seq: u8) -> Self {
        Self {
            op,
            flags: 0,
            len: 0,
            group,
            seq,
            id,
        }
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.op as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.len);
        buf.put_u16(self.group);
        buf.put_u8(self.seq);
        buf.put_u8(self.id);
    }

    /// Parses the header at the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < NMP_HDR_SIZE {
            return Err(ProtocolError::IncompleteHeader {
                needed: NMP_HDR_SIZE - buf.len(),
            });
        }

        Ok(Self {
            op: NmpOp::from_u8(buf[0])?,
            flags: buf[1],
            len: u16::from_be_bytes([buf[2], buf[3]]),
            group: u16::from_be_bytes([buf[4], buf[5]]),
            seq: buf[6],
            id: buf[7],
        })
    }

    /// Verifies that `rsp` is the response header for this request header.
    pub fn check_rsp(&self, rsp: &NmpHdr) -> Result<(), ProtocolError> {
        if rsp.op != self.op.rsp() || rsp.group != self.group || rsp.id != self.id {
            return Err(ProtocolError::HeaderMismatch {
                expected_op: self.op.rsp() as u8,
                expected_group: self.group,
                expected_id: self.id,
                actual_op: rsp.op as u8,
                actual_group: rsp.group,
                actual_id: rsp.id,
            });
        }
        Ok(())
    }
}

/// A complete NMP message: header plus CBOR body.
#[derive(Debug, Clone, PartialEq)]
pub struct NmpMsg {
    pub hdr: NmpHdr,
    pub body: CborMap,
}

impl NmpMsg {
    /// Creates a message with an empty body.
    pub fn new(op: NmpOp, group: u16, id: u8, seq: u8) -> Self {
        Self {
            hdr: NmpHdr::new(op, group, id, seq),
            body: CborMap::new(),
        }
    }

    pub fn with_body(mut self, body: CborMap) -> Self {
        self.body = body;
        self
    }

    /// Returns a copy of this message carrying a different sequence number.
    pub fn with_seq(&self, seq: u8) -> Self {
        let mut msg = self.clone();
        msg.hdr.seq = seq;
        msg
    }

    /// Encodes the message into bytes. The header length field is computed
    /// from the encoded body.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let body = cbor::encode(&self.body)?;
        if body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY_SIZE,
            });
        }

        let mut hdr = self.hdr;
        hdr.len = body.len() as u16;

        let mut buf = BytesMut::with_capacity(NMP_HDR_SIZE + body.len());
        hdr.encode_to(&mut buf);
        buf.put_slice(&body);
        Ok(buf)
    }

    /// Decodes exactly one message from `buf`.
    ///
    /// The declared body length must match the bytes that follow the header.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let hdr = NmpHdr::decode(buf)?;
        let body = &buf[NMP_HDR_SIZE..];
        if body.len() != hdr.len as usize {
            return Err(ProtocolError::LengthMismatch {
                declared: hdr.len as usize,
                actual: body.len(),
            });
        }

        Ok(Self {
            hdr,
            body: cbor::decode(body)?,
        })
    }
}
