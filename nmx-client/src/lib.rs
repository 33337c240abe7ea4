//! # nmx-client
//!
//! Transaction engine for NMP and CoAP device management.
//!
//! This crate provides:
//! - The [`Session`] contract a transport implements
//! - Timeout-driven retry for single request/response exchanges
//! - Typed commands with uniform transaction options
//! - A UDP session

pub mod commands;
pub mod error;
pub mod options;
pub mod retry;
pub mod session;
pub mod udp;
pub mod xact;

#[cfg(test)]
mod mock;

pub use commands::{
    DeleteResCmd, DeleteResResult, EchoCmd, EchoResult, GetResCmd, GetResResult, PostResCmd,
    PostResResult, PutResCmd, PutResResult, ResetCmd, ResetResult, TestPepCmd, TestPepResult,
};
pub use error::ClientError;
pub use options::TxOptions;
pub use session::{ResourceType, Session};
pub use udp::{UdpSession, UdpSessionConfig};
pub use xact::{Cmd, CmdBase, CmdResult};
