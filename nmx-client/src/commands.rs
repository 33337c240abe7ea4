//! Typed device commands.

use crate::error::ClientError;
use crate::retry;
use crate::session::{ResourceType, Session};
use crate::xact::{self, Cmd, CmdBase, CmdResult};
use async_trait::async_trait;
use bytes::Bytes;
use nmx_protocol::message::{EchoReq, EchoRsp, ResetReq, ResetRsp, TestPepReq, TestPepRsp};
use nmx_protocol::{cbor, CborMap, CoapCode, ProtocolError};

// ============================================================================
// NMP commands
// ============================================================================

/// Sends text to the device and receives it back.
#[derive(Debug, Clone, Default)]
pub struct EchoCmd {
    base: CmdBase,
    pub payload: String,
}

impl EchoCmd {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct EchoResult {
    pub rsp: EchoRsp,
}

impl CmdResult for EchoResult {
    fn status(&self) -> i32 {
        self.rsp.rc
    }
}

#[async_trait]
impl Cmd for EchoCmd {
    type Result = EchoResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<EchoResult, ClientError> {
        let req = EchoReq {
            payload: self.payload.clone(),
        };
        let rsp = xact::tx_req(s, &req, &self.base).await?;
        Ok(EchoResult { rsp })
    }
}

/// Echo through the per-user pepp group.
#[derive(Debug, Clone, Default)]
pub struct TestPepCmd {
    base: CmdBase,
    pub payload: String,
}

impl TestPepCmd {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct TestPepResult {
    pub rsp: TestPepRsp,
}

impl CmdResult for TestPepResult {
    fn status(&self) -> i32 {
        self.rsp.rc
    }
}

#[async_trait]
impl Cmd for TestPepCmd {
    type Result = TestPepResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<TestPepResult, ClientError> {
        let req = TestPepReq {
            payload: self.payload.clone(),
        };
        let rsp = xact::tx_req(s, &req, &self.base).await?;
        Ok(TestPepResult { rsp })
    }
}

/// Asks the device to reboot.
#[derive(Debug, Clone, Default)]
pub struct ResetCmd {
    base: CmdBase,
}

impl ResetCmd {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ResetResult {
    pub rsp: ResetRsp,
}

impl CmdResult for ResetResult {
    fn status(&self) -> i32 {
        self.rsp.rc
    }
}

#[async_trait]
impl Cmd for ResetCmd {
    type Result = ResetResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<ResetResult, ClientError> {
        let rsp = xact::tx_req(s, &ResetReq, &self.base).await?;
        Ok(ResetResult { rsp })
    }
}

// ============================================================================
// Resource commands
// ============================================================================

/// Status of a resource response: 0 for one of the expected success codes,
/// otherwise the raw CoAP code.
fn res_status(code: CoapCode, ok: &[CoapCode]) -> i32 {
    if ok.contains(&code) {
        0
    } else {
        i32::from(code.0)
    }
}

/// Reads a resource.
#[derive(Debug, Clone)]
pub struct GetResCmd {
    base: CmdBase,
    pub path: String,
    pub res_type: ResourceType,
}

impl GetResCmd {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            base: CmdBase::new(),
            path: path.into(),
            res_type: ResourceType::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetResResult {
    pub code: CoapCode,
    pub value: Bytes,
}

impl GetResResult {
    /// Decodes the payload as a CBOR map.
    pub fn value_map(&self) -> Result<CborMap, ProtocolError> {
        cbor::decode(&self.value)
    }
}

impl CmdResult for GetResResult {
    fn status(&self) -> i32 {
        res_status(self.code, &[CoapCode::CONTENT])
    }
}

#[async_trait]
impl Cmd for GetResCmd {
    type Result = GetResResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<GetResResult, ClientError> {
        let (code, value) =
            retry::get_resource(s, self.res_type, &self.path, self.base.tx_options()).await?;
        Ok(GetResResult { code, value })
    }
}

/// Writes a CBOR map to a resource.
#[derive(Debug, Clone)]
pub struct PutResCmd {
    base: CmdBase,
    pub path: String,
    pub value: CborMap,
    pub res_type: ResourceType,
}

impl PutResCmd {
    pub fn new(path: impl Into<String>, value: CborMap) -> Self {
        Self {
            base: CmdBase::new(),
            path: path.into(),
            value,
            res_type: ResourceType::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutResResult {
    pub code: CoapCode,
    pub value: CborMap,
}

impl CmdResult for PutResResult {
    fn status(&self) -> i32 {
        res_status(self.code, &[CoapCode::CHANGED, CoapCode::CREATED])
    }
}

#[async_trait]
impl Cmd for PutResCmd {
    type Result = PutResResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<PutResResult, ClientError> {
        let (code, value) = retry::put_cbor_resource(
            s,
            self.res_type,
            &self.path,
            &self.value,
            self.base.tx_options(),
        )
        .await?;
        Ok(PutResResult { code, value })
    }
}

/// Posts raw bytes to a resource.
#[derive(Debug, Clone)]
pub struct PostResCmd {
    base: CmdBase,
    pub path: String,
    pub value: Bytes,
    pub res_type: ResourceType,
}

impl PostResCmd {
    pub fn new(path: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            base: CmdBase::new(),
            path: path.into(),
            value: value.into(),
            res_type: ResourceType::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostResResult {
    pub code: CoapCode,
    pub value: Bytes,
}

impl CmdResult for PostResResult {
    fn status(&self) -> i32 {
        res_status(self.code, &[CoapCode::CHANGED, CoapCode::CREATED])
    }
}

#[async_trait]
impl Cmd for PostResCmd {
    type Result = PostResResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<PostResResult, ClientError> {
        let (code, value) = retry::post_resource(
            s,
            self.res_type,
            &self.path,
            self.value.clone(),
            self.base.tx_options(),
        )
        .await?;
        Ok(PostResResult { code, value })
    }
}

/// Deletes a resource.
#[derive(Debug, Clone)]
pub struct DeleteResCmd {
    base: CmdBase,
    pub path: String,
    pub res_type: ResourceType,
}

impl DeleteResCmd {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            base: CmdBase::new(),
            path: path.into(),
            res_type: ResourceType::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteResResult {
    pub code: CoapCode,
}

impl CmdResult for DeleteResResult {
    fn status(&self) -> i32 {
        res_status(self.code, &[CoapCode::DELETED])
    }
}

#[async_trait]
impl Cmd for DeleteResCmd {
    type Result = DeleteResResult;

    fn base(&self) -> &CmdBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CmdBase {
        &mut self.base
    }

    async fn run(&self, s: &dyn Session) -> Result<DeleteResResult, ClientError> {
        let (code, _) =
            retry::delete_resource(s, self.res_type, &self.path, self.base.tx_options()).await?;
        Ok(DeleteResResult { code })
    }
}
