//! Transaction layer shared by all commands.

use crate::error::ClientError;
use crate::options::TxOptions;
use crate::retry;
use crate::session::Session;
use async_trait::async_trait;
use nmx_protocol::message::{self, NmpReq};

/// State every command carries: its transaction options.
#[derive(Debug, Clone, Default)]
pub struct CmdBase {
    tx_options: TxOptions,
}

impl CmdBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_options(&self) -> &TxOptions {
        &self.tx_options
    }

    pub fn set_tx_options(&mut self, opts: TxOptions) {
        self.tx_options = opts;
    }
}

/// The typed outcome of a successful command.
pub trait CmdResult: Send {
    /// Device-reported status; 0 means the operation succeeded.
    fn status(&self) -> i32;
}

/// A device operation that can be run against a session.
#[async_trait]
pub trait Cmd: Send + Sync {
    type Result: CmdResult;

    fn base(&self) -> &CmdBase;

    fn base_mut(&mut self) -> &mut CmdBase;

    fn tx_options(&self) -> &TxOptions {
        self.base().tx_options()
    }

    fn set_tx_options(&mut self, opts: TxOptions) {
        self.base_mut().set_tx_options(opts);
    }

    /// Runs one transaction. Each call uses a new sequence number or token.
    async fn run(&self, s: &dyn Session) -> Result<Self::Result, ClientError>;
}

/// Sends a typed request and decodes its typed response.
///
/// The response must carry the request's group and id; anything else is a
/// protocol error and is not retried.
pub async fn tx_req<R>(s: &dyn Session, req: &R, base: &CmdBase) -> Result<R::Rsp, ClientError>
where
    R: NmpReq + Sync,
{
    let msg = req.msg(s.next_seq());
    tracing::debug!(
        "xact: op={:?} group={} id={} seq={}",
        msg.hdr.op,
        msg.hdr.group,
        msg.hdr.id,
        msg.hdr.seq
    );

    let rsp = retry::tx_nmp(s, &msg, base.tx_options()).await?;
    let typed = message::decode_rsp::<R>(&msg, &rsp)?;
    Ok(typed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSession, Step};
    use nmx_protocol::message::EchoReq;
    use nmx_protocol::nmp::{group, id};
    use nmx_protocol::{CborMap, NmpMsg, NmpOp, ProtocolError};

    fn echo() -> EchoReq {
        EchoReq {
            payload: "hi".to_string(),
        }
    }

    #[tokio::test]
    async fn test_tx_req_decodes_typed_response() {
        let s = MockSession::new(vec![Step::NmpBody(CborMap::new().with("r", "hi"))]);
        let rsp = tx_req(&s, &echo(), &CmdBase::new()).await.unwrap();
        assert_eq!(rsp.payload, "hi");
        assert_eq!(rsp.rc, 0);
    }

    #[tokio::test]
    async fn test_tx_req_rejects_mismatched_group() {
        let wrong = NmpMsg::new(NmpOp::WriteRsp, group::PEPP, id::DEF_ECHO, 0)
            .with_body(CborMap::new().with("r", "hi"));
        let s = MockSession::new(vec![Step::NmpRaw(wrong)]);

        let err = tx_req(&s, &echo(), &CmdBase::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::HeaderMismatch { .. })
        ));
        assert_eq!(s.attempts(), 1);
    }

    #[tokio::test]
    async fn test_tx_req_rejects_mismatched_id() {
        let wrong = NmpMsg::new(NmpOp::WriteRsp, group::DEFAULT, id::DEF_RESET, 0);
        let s = MockSession::new(vec![Step::NmpRaw(wrong)]);
        assert!(tx_req(&s, &echo(), &CmdBase::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_tx_req_field_type_error_is_fatal() {
        let s = MockSession::new(vec![Step::NmpBody(CborMap::new().with("r", 1))]);
        let mut base = CmdBase::new();
        base.set_tx_options(TxOptions::new().with_tries(3));

        let err = tx_req(&s, &echo(), &base).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidField { .. })
        ));
        assert_eq!(s.attempts(), 1);
    }

    #[tokio::test]
    async fn test_each_call_uses_new_sequence_number() {
        let s = MockSession::new(vec![
            Step::NmpBody(CborMap::new()),
            Step::NmpBody(CborMap::new()),
        ]);
        let base = CmdBase::new();
        tx_req(&s, &echo(), &base).await.unwrap();
        tx_req(&s, &echo(), &base).await.unwrap();

        let sent = s.nmp_sent.lock();
        assert_ne!(sent[0].hdr.seq, sent[1].hdr.seq);
    }
}
