//! Session over a connected UDP socket.
//!
//! NMP and CoAP share the socket. A reader task classifies each datagram by
//! its first byte: CoAP version bits `01` route it to the resource path,
//! everything else is parsed as NMP. At most one request is outstanding, so
//! the reader only needs to compare the arriving correlator with a single
//! pending slot.

use crate::error::ClientError;
use crate::options::TxOptions;
use crate::session::{ResourceType, Session};
use async_trait::async_trait;
use bytes::Bytes;
use nmx_protocol::oic::CoapType;
use nmx_protocol::{
    CoapCode, CoapMessage, CoapRequest, Correlators, NmpHdr, NmpMsg, ProtocolError, NMP_HDR_SIZE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default receive buffer size (2 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2 * 1024;

/// Minimum receive buffer size (512 bytes).
pub const MIN_READ_BUFFER_SIZE: usize = 512;

/// Maximum receive buffer size, the largest UDP payload.
pub const MAX_READ_BUFFER_SIZE: usize = 65_535;

/// UDP session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpSessionConfig {
    /// Device address.
    pub peer: SocketAddr,
    /// Local address to bind. Defaults to an ephemeral port on the
    /// unspecified address of the peer's family.
    #[serde(default)]
    pub bind_addr: Option<SocketAddr>,
    /// Receive buffer size. A longer response fails its attempt as malformed.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

impl UdpSessionConfig {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            bind_addr: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// Applies `NMX_UDP_PEER` and `NMX_UDP_BIND`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(peer) = env_addr("NMX_UDP_PEER") {
            self.peer = peer;
        }
        if let Some(bind) = env_addr("NMX_UDP_BIND") {
            self.bind_addr = Some(bind);
        }
    }

    fn local_addr(&self) -> SocketAddr {
        match self.bind_addr {
            Some(addr) => addr,
            None if self.peer.is_ipv6() => SocketAddr::from(([0u16; 8], 0)),
            None => SocketAddr::from(([0u8; 4], 0)),
        }
    }
}

fn env_addr(key: &str) -> Option<SocketAddr> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            tracing::warn!("ignoring {}: {:?} is not a socket address", key, value);
            None
        }
    }
}

/// The attempt currently waiting for a response.
enum Pending {
    Nmp {
        seq: u8,
        tx: oneshot::Sender<Result<NmpMsg, ClientError>>,
    },
    Coap {
        token: Vec<u8>,
        tx: oneshot::Sender<Result<CoapMessage, ClientError>>,
    },
}

impl Pending {
    /// Whether a response with header `hdr` answers this attempt.
    fn matches_nmp(&self, hdr: &NmpHdr) -> bool {
        matches!(self, Pending::Nmp { seq, .. } if *seq == hdr.seq && hdr.op.is_rsp())
    }

    fn matches_coap(&self, token: &[u8]) -> bool {
        matches!(self, Pending::Coap { token: t, .. } if t.as_slice() == token)
    }

    fn fail(self, err: ClientError) {
        // A dropped receiver means the attempt already gave up.
        match self {
            Pending::Nmp { tx, .. } => {
                let _ = tx.send(Err(err));
            }
            Pending::Coap { tx, .. } => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// State shared between the session and its reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<Option<Pending>>,
    /// Set once the reader has stopped; the socket no longer delivers
    /// responses.
    dead: AtomicBool,
}

impl Shared {
    fn complete_nmp(&self, rsp: NmpMsg) {
        let mut slot = self.pending.lock();
        match slot.take() {
            Some(Pending::Nmp { seq, tx }) if seq == rsp.hdr.seq && rsp.hdr.op.is_rsp() => {
                let _ = tx.send(Ok(rsp));
            }
            other => {
                tracing::debug!("udp: dropping unmatched NMP response seq={}", rsp.hdr.seq);
                *slot = other;
            }
        }
    }

    fn complete_coap(&self, rsp: CoapMessage) {
        let mut slot = self.pending.lock();
        match slot.take() {
            Some(Pending::Coap { token, tx }) if token == rsp.token => {
                let _ = tx.send(Ok(rsp));
            }
            other => {
                tracing::debug!("udp: dropping unmatched CoAP response token={:02x?}", rsp.token);
                *slot = other;
            }
        }
    }

    /// Fails the pending attempt if `answers` says the datagram was meant for
    /// it.
    fn fail_if(&self, answers: impl FnOnce(&Pending) -> bool, err: ClientError) {
        let mut slot = self.pending.lock();
        match slot.take() {
            Some(pending) if answers(&pending) => pending.fail(err),
            other => *slot = other,
        }
    }

    /// Parses an NMP datagram. A malformed response that correlates with the
    /// pending attempt fails it; anything else malformed is dropped.
    fn handle_nmp(&self, datagram: &[u8], truncated: bool) {
        let hdr = match NmpHdr::decode(datagram) {
            Ok(hdr) => hdr,
            Err(e) => {
                tracing::warn!("udp: discarding malformed NMP datagram: {}", e);
                return;
            }
        };

        let decoded = if truncated {
            Err(ProtocolError::LengthMismatch {
                declared: usize::from(hdr.len),
                actual: datagram.len() - NMP_HDR_SIZE,
            })
        } else {
            NmpMsg::decode(datagram)
        };

        match decoded {
            Ok(rsp) => self.complete_nmp(rsp),
            Err(e) => {
                tracing::warn!("udp: malformed NMP response seq={}: {}", hdr.seq, e);
                self.fail_if(|p| p.matches_nmp(&hdr), ClientError::Protocol(e));
            }
        }
    }

    fn fail(&self, err: ClientError) {
        if let Some(pending) = self.pending.lock().take() {
            pending.fail(err);
        }
    }

    /// Marks the reader as stopped and fails the waiting attempt.
    fn stop(&self, err: ClientError) {
        self.dead.store(true, Ordering::SeqCst);
        self.fail(err);
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

/// A [`Session`] to one device over UDP.
pub struct UdpSession {
    config: UdpSessionConfig,
    correlators: Correlators,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    /// Serialises transactions; held for the whole of one attempt.
    xact_lock: tokio::sync::Mutex<()>,
    next_mid: AtomicU16,
    open: AtomicBool,
}

impl UdpSession {
    /// Creates a session that is not yet open.
    pub fn new(config: UdpSessionConfig, correlators: Correlators) -> Self {
        Self {
            config,
            correlators,
            socket: Mutex::new(None),
            reader: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            xact_lock: tokio::sync::Mutex::new(()),
            next_mid: AtomicU16::new(1),
            open: AtomicBool::new(false),
        }
    }

    /// Creates a session and opens it.
    pub async fn open(config: UdpSessionConfig, correlators: Correlators) -> Result<Self, ClientError> {
        let session = Self::new(config, correlators);
        session.connect().await?;
        Ok(session)
    }

    /// Binds the local socket, connects it to the peer and starts the reader.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_open() {
            return Ok(());
        }
        if let Some(old) = self.reader.lock().take() {
            old.abort();
        }

        let local = self.config.local_addr();
        tracing::debug!("udp: binding {} for peer {}", local, self.config.peer);
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.config.peer).await?;
        let socket = Arc::new(socket);
        self.shared.dead.store(false, Ordering::SeqCst);

        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            Arc::clone(&self.shared),
            self.config.read_buffer_size,
        ));

        *self.socket.lock() = Some(socket);
        *self.reader.lock() = Some(reader);
        self.open.store(true, Ordering::SeqCst);
        tracing::debug!("udp: session open to {}", self.config.peer);
        Ok(())
    }

    /// Whether the session is open and its reader is still running.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.shared.is_dead()
    }

    pub fn peer(&self) -> SocketAddr {
        self.config.peer
    }

    /// Local address of the socket, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.lock().as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Stops the reader and fails any waiting attempt with
    /// [`ClientError::Closed`].
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.socket.lock().take();
        self.shared.fail(ClientError::Closed);
        tracing::debug!("udp: session to {} closed", self.config.peer);
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, ClientError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ClientError::NotOpen);
        }
        if self.shared.is_dead() {
            return Err(ClientError::Closed);
        }
        self.socket.lock().clone().ok_or(ClientError::NotOpen)
    }

    /// Installs `pending`, sends `datagram` and waits for the reader to
    /// complete the slot.
    async fn exchange<T>(
        &self,
        socket: &UdpSocket,
        datagram: &[u8],
        pending: Pending,
        rx: oneshot::Receiver<Result<T, ClientError>>,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        *self.shared.pending.lock() = Some(pending);
        // The reader marks itself dead before failing the slot, so a slot
        // installed after that point is failed here.
        if self.shared.is_dead() {
            self.shared.pending.lock().take();
            return Err(ClientError::Closed);
        }

        if let Err(e) = socket.send(datagram).await {
            self.shared.pending.lock().take();
            return Err(ClientError::Io(e));
        }

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::RspTimeout(timeout)),
        };

        // Anything arriving for this attempt from now on is stale.
        self.shared.pending.lock().take();
        result
    }
}

impl Drop for UdpSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl Session for UdpSession {
    async fn transmit_nmp_once(&self, msg: &NmpMsg, opts: &TxOptions) -> Result<NmpMsg, ClientError> {
        let _xact = self.xact_lock.lock().await;
        let socket = self.socket()?;
        let datagram = msg.encode()?;

        let (tx, rx) = oneshot::channel();
        let pending = Pending::Nmp {
            seq: msg.hdr.seq,
            tx,
        };
        tracing::debug!(
            "udp: tx NMP seq={} ({} bytes) to {}",
            msg.hdr.seq,
            datagram.len(),
            self.config.peer
        );
        self.exchange(&socket, &datagram, pending, rx, opts.timeout).await
    }

    async fn transmit_coap_once(
        &self,
        req: &CoapRequest,
        res_type: ResourceType,
        opts: &TxOptions,
    ) -> Result<(CoapCode, Bytes), ClientError> {
        let _xact = self.xact_lock.lock().await;
        let socket = self.socket()?;
        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
        let datagram = req.to_message(mid).encode()?;

        let (tx, rx) = oneshot::channel();
        let pending = Pending::Coap {
            token: req.token().to_vec(),
            tx,
        };
        tracing::debug!(
            "udp: tx CoAP {} {} ({}) mid={} to {}",
            req.method(),
            req.path(),
            res_type,
            mid,
            self.config.peer
        );
        let rsp = self.exchange(&socket, &datagram, pending, rx, opts.timeout).await?;
        Ok((rsp.code, rsp.payload))
    }

    fn next_seq(&self) -> u8 {
        self.correlators.seq.next()
    }

    fn next_token(&self) -> Vec<u8> {
        self.correlators.token.next()
    }
}

async fn read_loop(socket: Arc<UdpSocket>, shared: Arc<Shared>, buffer_size: usize) {
    // One spare byte: a datagram that fills it exceeds `buffer_size` and has
    // been cut short by the kernel.
    let mut buf = vec![0u8; buffer_size + 1];

    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                // ICMP port unreachable surfaces here on a connected socket;
                // the socket itself is still usable.
                tracing::debug!("udp: peer unreachable: {}", e);
                shared.fail(ClientError::Io(io::Error::new(e.kind(), e.to_string())));
                continue;
            }
            Err(e) => {
                tracing::warn!("udp: reader stopped: {}", e);
                shared.stop(ClientError::Io(e));
                return;
            }
        };

        let truncated = n > buffer_size;
        let datagram = &buf[..n.min(buffer_size)];
        if CoapMessage::is_coap(datagram) {
            handle_coap(&socket, &shared, datagram, truncated).await;
        } else {
            shared.handle_nmp(datagram, truncated);
        }
    }
}

async fn handle_coap(socket: &UdpSocket, shared: &Shared, datagram: &[u8], truncated: bool) {
    let msg = match CoapMessage::decode(datagram) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("udp: discarding malformed CoAP datagram: {}", e);
            return;
        }
    };

    if msg.mtype == CoapType::Confirmable {
        let ack = CoapMessage::empty_ack(msg.message_id);
        match ack.encode() {
            Ok(ack) => {
                if let Err(e) = socket.send(&ack).await {
                    tracing::debug!("udp: failed to ack mid={}: {}", msg.message_id, e);
                }
            }
            Err(e) => tracing::debug!("udp: failed to encode ack: {}", e),
        }
    }

    if msg.is_empty() {
        return;
    }
    if truncated {
        tracing::warn!("udp: truncated CoAP response mid={}", msg.message_id);
        let err = ClientError::Protocol(ProtocolError::MalformedCoap("datagram truncated"));
        shared.fail_if(|p| p.matches_coap(&msg.token), err);
        return;
    }
    shared.complete_coap(msg);
}
