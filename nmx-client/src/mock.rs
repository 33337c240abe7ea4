//! Scripted session used by the unit tests.

use crate::error::ClientError;
use crate::options::TxOptions;
use crate::session::{ResourceType, Session};
use async_trait::async_trait;
use bytes::Bytes;
use nmx_protocol::{CborMap, CoapCode, CoapRequest, Correlators, NmpMsg};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// What the scripted device does with the next attempt.
pub(crate) enum Step {
    Timeout,
    TransportError(&'static str),
    /// Reply with a response header derived from the request and this body.
    NmpBody(CborMap),
    /// Reply with exactly this message.
    NmpRaw(NmpMsg),
    Coap(CoapCode, Bytes),
}

/// A session that plays back a script. Once the script runs out every further
/// attempt times out.
pub(crate) struct MockSession {
    steps: Mutex<VecDeque<Step>>,
    pub(crate) nmp_sent: Mutex<Vec<NmpMsg>>,
    pub(crate) coap_sent: Mutex<Vec<CoapRequest>>,
    correlators: Correlators,
}

impl MockSession {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            nmp_sent: Mutex::new(Vec::new()),
            coap_sent: Mutex::new(Vec::new()),
            correlators: Correlators::new(),
        }
    }

    pub(crate) fn timeouts_then(k: usize, last: Step) -> Self {
        let mut steps: Vec<Step> = (0..k).map(|_| Step::Timeout).collect();
        steps.push(last);
        Self::new(steps)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.nmp_sent.lock().len() + self.coap_sent.lock().len()
    }

    fn next_step(&self) -> Step {
        self.steps.lock().pop_front().unwrap_or(Step::Timeout)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn transmit_nmp_once(&self, msg: &NmpMsg, opts: &TxOptions) -> Result<NmpMsg, ClientError> {
        self.nmp_sent.lock().push(msg.clone());
        match self.next_step() {
            Step::Timeout => Err(ClientError::RspTimeout(opts.timeout)),
            Step::TransportError(what) => Err(ClientError::Io(std::io::Error::other(what))),
            Step::NmpBody(body) => {
                let mut hdr = msg.hdr;
                hdr.op = hdr.op.rsp();
                Ok(NmpMsg { hdr, body })
            }
            Step::NmpRaw(rsp) => Ok(rsp),
            Step::Coap(..) => panic!("CoAP step scripted for an NMP attempt"),
        }
    }

    async fn transmit_coap_once(
        &self,
        req: &CoapRequest,
        _res_type: ResourceType,
        opts: &TxOptions,
    ) -> Result<(CoapCode, Bytes), ClientError> {
        self.coap_sent.lock().push(req.clone());
        match self.next_step() {
            Step::Timeout => Err(ClientError::RspTimeout(opts.timeout)),
            Step::TransportError(what) => Err(ClientError::Io(std::io::Error::other(what))),
            Step::Coap(code, body) => Ok((code, body)),
            Step::NmpBody(_) | Step::NmpRaw(_) => panic!("NMP step scripted for a CoAP attempt"),
        }
    }

    fn next_seq(&self) -> u8 {
        self.correlators.seq.next()
    }

    fn next_token(&self) -> Vec<u8> {
        self.correlators.token.next()
    }
}
