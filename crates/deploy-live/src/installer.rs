//! Client side of the installer RPC.
//!
//! Frames are a big-endian `u32` byte count followed by a bincode body.

use std::io::{self, Read, Write};
use std::sync::{Mutex, PoisonError};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::proto::{
    ComposeStatusRequest, ComposeStatusResponse, InstallerRequest, InstallerResponse,
    LiveEditRequest, LiveEditResponse, LiveLiteralUpdateRequest, LiveLiteralUpdateResponse,
};

/// Upper bound on a single frame body in either direction.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("installer message codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("installer message of {len} bytes exceeds the 64 MiB limit")]
    FrameTooLarge { len: usize },
    #[error("expected a {expected} response from the installer, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("installer failed: {0}")]
    Remote(String),
}

/// Commands the deployer sends to the on-device installer.
pub trait Installer {
    fn update_live_literals(
        &self,
        request: &LiveLiteralUpdateRequest,
    ) -> Result<LiveLiteralUpdateResponse, InstallerError>;

    fn live_edit(&self, request: &LiveEditRequest) -> Result<LiveEditResponse, InstallerError>;

    fn compose_status(
        &self,
        request: &ComposeStatusRequest,
    ) -> Result<ComposeStatusResponse, InstallerError>;
}

fn bincode_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

pub fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), InstallerError>
where
    W: Write + ?Sized,
    T: Serialize,
{
    let body = bincode_options().serialize(message)?;
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(InstallerError::FrameTooLarge { len: body.len() });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

pub fn read_message<R, T>(reader: &mut R) -> Result<T, InstallerError>
where
    R: Read + ?Sized,
    T: DeserializeOwned,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(InstallerError::FrameTooLarge { len });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(bincode_options()
        .with_limit(MAX_MESSAGE_BYTES as u64)
        .deserialize(&body)?)
}

/// [`Installer`] speaking the framed protocol over any byte stream, one call
/// at a time.
pub struct RpcInstaller<S> {
    stream: Mutex<S>,
}

impl<S: Read + Write> RpcInstaller<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn call(&self, request: &InstallerRequest) -> Result<InstallerResponse, InstallerError> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(target: crate::TRACE_TARGET, request = request.name(), "installer call");
        write_message(&mut *stream, request)?;
        let response: InstallerResponse = read_message(&mut *stream)?;
        match response {
            InstallerResponse::Error { message } => Err(InstallerError::Remote(message)),
            response => Ok(response),
        }
    }
}

impl<S: Read + Write> Installer for RpcInstaller<S> {
    fn update_live_literals(
        &self,
        request: &LiveLiteralUpdateRequest,
    ) -> Result<LiveLiteralUpdateResponse, InstallerError> {
        match self.call(&InstallerRequest::LiveLiteralUpdate(request.clone()))? {
            InstallerResponse::LiveLiteralUpdate(response) => Ok(response),
            other => Err(unexpected("live-literal-update", &other)),
        }
    }

    fn live_edit(&self, request: &LiveEditRequest) -> Result<LiveEditResponse, InstallerError> {
        match self.call(&InstallerRequest::LiveEdit(request.clone()))? {
            InstallerResponse::LiveEdit(response) => Ok(response),
            other => Err(unexpected("live-edit", &other)),
        }
    }

    fn compose_status(
        &self,
        request: &ComposeStatusRequest,
    ) -> Result<ComposeStatusResponse, InstallerError> {
        match self.call(&InstallerRequest::ComposeStatus(request.clone()))? {
            InstallerResponse::ComposeStatus(response) => Ok(response),
            other => Err(unexpected("compose-status", &other)),
        }
    }
}

fn unexpected(expected: &'static str, actual: &InstallerResponse) -> InstallerError {
    InstallerError::UnexpectedResponse {
        expected,
        actual: actual.name(),
    }
}
