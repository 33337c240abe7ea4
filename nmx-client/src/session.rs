//! The session abstraction every transport implements.

use crate::error::ClientError;
use crate::options::TxOptions;
use async_trait::async_trait;
use bytes::Bytes;
use nmx_protocol::{CoapCode, CoapRequest, NmpMsg};
use std::fmt;

/// Class of resource a CoAP request addresses. Transports with distinct
/// channels per class (e.g. BLE characteristics) use this to pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceType {
    #[default]
    Public,
    Unauth,
    Secure,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Public => write!(f, "public"),
            ResourceType::Unauth => write!(f, "unauth"),
            ResourceType::Secure => write!(f, "secure"),
        }
    }
}

/// One logical conversation with one device over one transport.
///
/// A session has at most one request awaiting a response at a time; calls
/// made concurrently on the same session are queued. Neither transmit method
/// retries, and both drop received traffic that does not carry the
/// outstanding request's sequence number or token.
#[async_trait]
pub trait Session: Send + Sync {
    /// Sends `msg` once and waits up to `opts.timeout` for the response with
    /// the same sequence number.
    async fn transmit_nmp_once(&self, msg: &NmpMsg, opts: &TxOptions) -> Result<NmpMsg, ClientError>;

    /// Sends `req` once and waits up to `opts.timeout` for the response with
    /// the same token. Returns the response code and payload.
    async fn transmit_coap_once(
        &self,
        req: &CoapRequest,
        res_type: ResourceType,
        opts: &TxOptions,
    ) -> Result<(CoapCode, Bytes), ClientError>;

    /// Draws the next NMP sequence number from the session's counter.
    fn next_seq(&self) -> u8;

    /// Draws the next CoAP token from the session's counter.
    fn next_token(&self) -> Vec<u8>;
}
