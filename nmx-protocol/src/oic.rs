//! OIC resource requests over CoAP.
//!
//! The builder half of this module constructs immutable [`CoapRequest`]s; the
//! codec half encodes and decodes RFC 7252 messages for transports that carry
//! CoAP directly (datagram sockets).

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// CoAP protocol version carried in every message header.
pub const COAP_VERSION: u8 = 1;

/// Maximum token length allowed by the CoAP header.
pub const MAX_TOKEN_LEN: usize = 8;

/// Separates options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xff;

/// Content-Format value for `application/cbor`.
pub const CONTENT_FORMAT_CBOR: u16 = 60;

/// Option numbers used by management requests.
pub mod option {
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
}

/// CoAP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoapType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl CoapType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => CoapType::Confirmable,
            1 => CoapType::NonConfirmable,
            2 => CoapType::Acknowledgement,
            _ => CoapType::Reset,
        }
    }
}

/// CoAP method or response code, `class.detail` packed into one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoapCode(pub u8);

impl CoapCode {
    pub const EMPTY: CoapCode = CoapCode::new(0, 0);
    pub const GET: CoapCode = CoapCode::new(0, 1);
    pub const POST: CoapCode = CoapCode::new(0, 2);
    pub const PUT: CoapCode = CoapCode::new(0, 3);
    pub const DELETE: CoapCode = CoapCode::new(0, 4);

    pub const CREATED: CoapCode = CoapCode::new(2, 1);
    pub const DELETED: CoapCode = CoapCode::new(2, 2);
    pub const VALID: CoapCode = CoapCode::new(2, 3);
    pub const CHANGED: CoapCode = CoapCode::new(2, 4);
    pub const CONTENT: CoapCode = CoapCode::new(2, 5);

    pub const BAD_REQUEST: CoapCode = CoapCode::new(4, 0);
    pub const UNAUTHORIZED: CoapCode = CoapCode::new(4, 1);
    pub const NOT_FOUND: CoapCode = CoapCode::new(4, 4);
    pub const METHOD_NOT_ALLOWED: CoapCode = CoapCode::new(4, 5);
    pub const INTERNAL_SERVER_ERROR: CoapCode = CoapCode::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1f))
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Resource request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn code(&self) -> CoapCode {
        match self {
            Method::Get => CoapCode::GET,
            Method::Post => CoapCode::POST,
            Method::Put => CoapCode::PUT,
            Method::Delete => CoapCode::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// An immutable resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapRequest {
    method: Method,
    confirmable: bool,
    path: String,
    token: Vec<u8>,
    payload: Option<Bytes>,
}

pub fn create_get(confirmable: bool, path: &str, token: Vec<u8>) -> Result<CoapRequest, ProtocolError> {
    CoapRequest::build(Method::Get, confirmable, path, token, None)
}

pub fn create_put(
    confirmable: bool,
    path: &str,
    token: Vec<u8>,
    payload: impl Into<Bytes>,
) -> Result<CoapRequest, ProtocolError> {
    CoapRequest::build(Method::Put, confirmable, path, token, Some(payload.into()))
}

pub fn create_post(
    confirmable: bool,
    path: &str,
    token: Vec<u8>,
    payload: impl Into<Bytes>,
) -> Result<CoapRequest, ProtocolError> {
    CoapRequest::build(Method::Post, confirmable, path, token, Some(payload.into()))
}

pub fn create_delete(
    confirmable: bool,
    path: &str,
    token: Vec<u8>,
) -> Result<CoapRequest, ProtocolError> {
    CoapRequest::build(Method::Delete, confirmable, path, token, None)
}

impl CoapRequest {
    fn build(
        method: Method,
        confirmable: bool,
        path: &str,
        token: Vec<u8>,
        payload: Option<Bytes>,
    ) -> Result<Self, ProtocolError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(ProtocolError::InvalidToken(token.len()));
        }
        if path_segments(path).is_none() {
            return Err(ProtocolError::InvalidPath(path.to_string()));
        }

        Ok(Self {
            method,
            confirmable,
            path: path.to_string(),
            token,
            payload,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn code(&self) -> CoapCode {
        self.method.code()
    }

    pub fn is_confirmable(&self) -> bool {
        self.confirmable
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Builds the wire message for this request.
    pub fn to_message(&self, message_id: u16) -> CoapMessage {
        let mut options: Vec<CoapOption> = path_segments(&self.path)
            .unwrap_or_default()
            .into_iter()
            .map(|seg| CoapOption::new(option::URI_PATH, seg.as_bytes().to_vec()))
            .collect();

        let payload = match &self.payload {
            Some(p) => {
                options.push(CoapOption::new(
                    option::CONTENT_FORMAT,
                    encode_uint(CONTENT_FORMAT_CBOR),
                ));
                p.clone()
            }
            None => Bytes::new(),
        };

        CoapMessage {
            mtype: if self.confirmable {
                CoapType::Confirmable
            } else {
                CoapType::NonConfirmable
            },
            code: self.code(),
            message_id,
            token: self.token.clone(),
            options,
            payload,
        }
    }
}

/// Splits `/a/b` into `["a", "b"]`. Returns `None` for an empty path or a path
/// with empty segments.
fn path_segments(path: &str) -> Option<Vec<&str>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return None;
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

/// Minimal big-endian encoding of an option integer.
fn encode_uint(value: u16) -> Vec<u8> {
    match value {
        0 => Vec::new(),
        1..=0xff => vec![value as u8],
        _ => value.to_be_bytes().to_vec(),
    }
}

/// A single CoAP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: u16, value: Vec<u8>) -> Self {
        Self { number, value }
    }
}

/// A CoAP message as carried in one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub mtype: CoapType,
    pub code: CoapCode,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<CoapOption>,
    pub payload: Bytes,
}

impl CoapMessage {
    /// An empty acknowledgement for a confirmable message.
    pub fn empty_ack(message_id: u16) -> Self {
        Self {
            mtype: CoapType::Acknowledgement,
            code: CoapCode::EMPTY,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.code == CoapCode::EMPTY
    }

    /// Returns the request path reassembled from Uri-Path options.
    pub fn uri_path(&self) -> String {
        let mut path = String::new();
        for opt in self.options.iter().filter(|o| o.number == option::URI_PATH) {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(&opt.value));
        }
        path
    }

    /// Returns true if `datagram` looks like a CoAP message (version bits 01).
    pub fn is_coap(datagram: &[u8]) -> bool {
        datagram
            .first()
            .map(|b| b >> 6 == COAP_VERSION)
            .unwrap_or(false)
    }

    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(ProtocolError::InvalidToken(self.token.len()));
        }

        let mut buf = BytesMut::with_capacity(4 + self.token.len() + self.payload.len() + 16);
        buf.put_u8((COAP_VERSION << 6) | ((self.mtype as u8) << 4) | self.token.len() as u8);
        buf.put_u8(self.code.0);
        buf.put_u16(self.message_id);
        buf.put_slice(&self.token);

        let mut options = self.options.clone();
        options.sort_by_key(|o| o.number);

        let mut last = 0u16;
        for opt in &options {
            let delta = opt.number - last;
            let len = opt.value.len();
            if len > u16::MAX as usize {
                return Err(ProtocolError::MalformedCoap("option value too long"));
            }
            let (delta_nibble, delta_ext) = option_nibble(delta);
            let (len_nibble, len_ext) = option_nibble(len as u16);
            buf.put_u8((delta_nibble << 4) | len_nibble);
            buf.put_slice(&delta_ext);
            buf.put_slice(&len_ext);
            buf.put_slice(&opt.value);
            last = opt.number;
        }

        if !self.payload.is_empty() {
            buf.put_u8(PAYLOAD_MARKER);
            buf.put_slice(&self.payload);
        }

        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 4 {
            return Err(ProtocolError::MalformedCoap("short header"));
        }

        let version = buf[0] >> 6;
        if version != COAP_VERSION {
            return Err(ProtocolError::UnsupportedCoapVersion(version));
        }
        let mtype = CoapType::from_bits(buf[0] >> 4);
        let tkl = (buf[0] & 0x0f) as usize;
        if tkl > MAX_TOKEN_LEN {
            return Err(ProtocolError::MalformedCoap("token length"));
        }
        let code = CoapCode(buf[1]);
        let message_id = u16::from_be_bytes([buf[2], buf[3]]);

        let mut pos = 4;
        let token = buf
            .get(pos..pos + tkl)
            .ok_or(ProtocolError::MalformedCoap("truncated token"))?
            .to_vec();
        pos += tkl;

        let mut options = Vec::new();
        let mut number = 0u16;
        let mut payload = Bytes::new();
        while pos < buf.len() {
            let byte = buf[pos];
            pos += 1;
            if byte == PAYLOAD_MARKER {
                if pos == buf.len() {
                    return Err(ProtocolError::MalformedCoap("empty payload after marker"));
                }
                payload = Bytes::copy_from_slice(&buf[pos..]);
                break;
            }

            let delta = read_option_ext(buf, &mut pos, byte >> 4)?;
            let len = read_option_ext(buf, &mut pos, byte & 0x0f)? as usize;
            number = number
                .checked_add(delta)
                .ok_or(ProtocolError::MalformedCoap("option number overflow"))?;
            let value = buf
                .get(pos..pos + len)
                .ok_or(ProtocolError::MalformedCoap("truncated option"))?
                .to_vec();
            pos += len;
            options.push(CoapOption { number, value });
        }

        Ok(Self {
            mtype,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }
}

fn option_nibble(value: u16) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, (value - 269).to_be_bytes().to_vec()),
    }
}

fn read_option_ext(buf: &[u8], pos: &mut usize, nibble: u8) -> Result<u16, ProtocolError> {
    match nibble {
        0..=12 => Ok(u16::from(nibble)),
        13 => {
            let b = *buf
                .get(*pos)
                .ok_or(ProtocolError::MalformedCoap("truncated option header"))?;
            *pos += 1;
            Ok(u16::from(b) + 13)
        }
        14 => {
            let ext = buf
                .get(*pos..*pos + 2)
                .ok_or(ProtocolError::MalformedCoap("truncated option header"))?;
            *pos += 2;
            u16::from_be_bytes([ext[0], ext[1]])
                .checked_add(269)
                .ok_or(ProtocolError::MalformedCoap("option value overflow"))
        }
        _ => Err(ProtocolError::MalformedCoap("reserved option nibble")),
    }
}
