//! Device-side JDWP/DDMS plumbing for the deployer.
//!
//! This crate speaks the protocol an adb daemon exposes through its
//! `jdwp:<pid>` service: the 14-byte handshake, JDWP packet framing and the
//! DDMS chunks carried inside JDWP command packets. It also owns the per-process
//! "one debugger at a time" session gate and a small fake-device server used by
//! tests and by `deploy fake-device`.
//!
//! Every accepted connection runs on its own thread with blocking reads. The
//! only state shared between connections is the [`DeviceState`] client
//! registry and each client's [`SessionGate`].

mod poison;

pub mod codec;
pub mod device;
pub mod dispatch;
pub mod handlers;
pub mod packet;
pub mod service;
pub mod session;

use std::io;

use thiserror::Error;

pub use codec::{client_handshake, handshake, Handshake, JdwpReader, JdwpWriter, HANDSHAKE};
pub use device::{ClientState, DeviceState};
pub use dispatch::{DdmHandler, DispatchTable, Flow, HandlerContext, JdwpHandler, LoopExit};
pub use packet::{ChunkType, CommandId, DdmPacket, JdwpPacket};
pub use service::{connect_jdwp, request_jdwp, ConnectionOutcome, FakeDeviceServer, JdwpService};
pub use session::{ContentionPolicy, SessionError, SessionGate, SessionGuard, SessionSettings};

/// Tracing target shared by every module in this crate.
pub const TRACE_TARGET: &str = "deploy.jdwp";

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("JDWP protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("JDWP handshake failed")]
    HandshakeFailed,
    #[error("adb rejected the jdwp service request: {0}")]
    ServiceRejected(String),
    #[error("JDWP string was not valid UTF-16")]
    InvalidUtf16,
}

pub type Result<T, E = JdwpError> = std::result::Result<T, E>;
