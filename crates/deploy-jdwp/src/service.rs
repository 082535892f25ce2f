//! The `jdwp:<pid>` adb service and a TCP server hosting it.
//!
//! A connection starts with an adb smart-socket request (`XXXXjdwp:<pid>`,
//! four hex digits of length). The service answers `OKAY` once it holds the
//! process's JDWP session, or `FAILXXXX<message>` when it cannot. After
//! `OKAY` the JDWP handshake runs and the dispatch loop takes over until the
//! debugger goes away.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::codec::{client_handshake, handshake, Handshake};
use crate::device::DeviceState;
use crate::dispatch::{DispatchTable, LoopExit};
use crate::session::{ContentionPolicy, SessionSettings};
use crate::{JdwpError, Result};

const OKAY: &[u8; 4] = b"OKAY";
const FAIL: &[u8; 4] = b"FAIL";
const MAX_REQUEST_LEN: usize = 0xFFFF;

/// How a single connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// The request was answered with `FAIL` and the given message.
    Rejected(String),
    /// The debugger's handshake did not match; the connection was dropped
    /// without a reply.
    HandshakeMismatch,
    /// The dispatch loop ran and ended for the given reason.
    Finished(LoopExit),
}

pub struct JdwpService {
    device: Arc<DeviceState>,
    table: Arc<DispatchTable>,
    settings: SessionSettings,
}

impl JdwpService {
    pub fn new(device: Arc<DeviceState>, table: Arc<DispatchTable>, settings: SessionSettings) -> Self {
        Self {
            device,
            table,
            settings,
        }
    }

    pub fn device(&self) -> &Arc<DeviceState> {
        &self.device
    }

    /// Serves one adb connection. While queued behind another session the
    /// request gives up as soon as `is_cancelled` reports true.
    pub fn serve<S: Read + Write>(
        &self,
        mut stream: S,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<ConnectionOutcome> {
        let request = read_request(&mut stream)?;
        let Some(pid) = request.strip_prefix("jdwp:") else {
            return reject(&mut stream, format!("unknown service: {request}"));
        };
        let Ok(pid) = pid.trim().parse::<u32>() else {
            return reject(&mut stream, format!("invalid pid: {pid}"));
        };
        let Some(client) = self.device.client(pid) else {
            return reject(&mut stream, format!("No client exists for pid: {pid}"));
        };

        let policy = ContentionPolicy::for_api_level(self.device.api_level(), &self.settings);
        let _session = match client.session().acquire(policy, is_cancelled) {
            Ok(guard) => guard,
            Err(err) => return reject(&mut stream, err.to_string()),
        };

        stream.write_all(OKAY)?;
        stream.flush()?;

        if handshake(&mut stream)? == Handshake::Mismatch {
            return Ok(ConnectionOutcome::HandshakeMismatch);
        }

        let exit = self.table.run_loop(&mut stream, &self.device, &client);
        Ok(ConnectionOutcome::Finished(exit))
    }

    pub fn serve_tcp(&self, stream: TcpStream) -> Result<ConnectionOutcome> {
        let _ = stream.set_nodelay(true);
        self.serve(&stream, &|| peer_closed(&stream))
    }
}

fn reject<W: Write>(stream: &mut W, message: String) -> Result<ConnectionOutcome> {
    tracing::debug!(target: crate::TRACE_TARGET, %message, "rejecting jdwp service request");
    write_fail(stream, &message)?;
    Ok(ConnectionOutcome::Rejected(message))
}

fn read_hex_len<R: Read + ?Sized>(reader: &mut R) -> Result<usize> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    std::str::from_utf8(&len)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| JdwpError::Protocol(format!("invalid adb length prefix {len:?}")))
}

fn read_request<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let len = read_hex_len(reader)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    String::from_utf8(body).map_err(|e| JdwpError::Protocol(format!("invalid adb request: {e}")))
}

fn write_request<W: Write + ?Sized>(writer: &mut W, request: &str) -> Result<()> {
    if request.len() > MAX_REQUEST_LEN {
        return Err(JdwpError::Protocol(format!(
            "adb request too long ({} bytes)",
            request.len()
        )));
    }
    write!(writer, "{:04x}{request}", request.len())?;
    writer.flush()?;
    Ok(())
}

fn write_fail<W: Write + ?Sized>(writer: &mut W, message: &str) -> Result<()> {
    let message = &message.as_bytes()[..message.len().min(MAX_REQUEST_LEN)];
    writer.write_all(FAIL)?;
    write!(writer, "{:04x}", message.len())?;
    writer.write_all(message)?;
    writer.flush()?;
    Ok(())
}

/// Whether the peer has closed its end, checked without consuming data.
fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut probe = [0u8; 1];
    let closed = match stream.peek(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    };
    let _ = stream.set_nonblocking(false);
    closed
}

/// Debugger side of the service: request `jdwp:<pid>`, wait for `OKAY`,
/// then perform the handshake. Returns the stream ready for JDWP packets.
pub fn connect_jdwp(addr: impl ToSocketAddrs, pid: u32) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;
    let _ = stream.set_nodelay(true);
    request_jdwp(&mut stream, pid)?;
    client_handshake(&mut stream)?;
    Ok(stream)
}

/// Sends the `jdwp:<pid>` request and consumes the adb status reply.
pub fn request_jdwp<S: Read + Write + ?Sized>(stream: &mut S, pid: u32) -> Result<()> {
    write_request(stream, &format!("jdwp:{pid}"))?;

    let mut status = [0u8; 4];
    stream.read_exact(&mut status)?;
    if &status == OKAY {
        return Ok(());
    }
    if &status != FAIL {
        return Err(JdwpError::Protocol(format!(
            "unexpected adb status {:?}",
            String::from_utf8_lossy(&status)
        )));
    }
    let len = read_hex_len(stream)?;
    let mut message = vec![0u8; len];
    stream.read_exact(&mut message)?;
    Err(JdwpError::ServiceRejected(
        String::from_utf8_lossy(&message).into_owned(),
    ))
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// EMFILE / ENFILE.
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(23 | 24))
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_resource_exhaustion(err)
}

/// Accepts adb connections and serves each on its own thread.
pub struct FakeDeviceServer {
    listener: TcpListener,
    service: Arc<JdwpService>,
}

impl FakeDeviceServer {
    pub fn bind(addr: impl ToSocketAddrs, service: JdwpService) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            service: Arc::new(service),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn service(&self) -> &Arc<JdwpService> {
        &self.service
    }

    /// Runs the accept loop on the calling thread. Per-connection accept
    /// failures are logged and skipped; only a broken listener ends the loop.
    pub fn serve(self) -> io::Result<()> {
        let mut next_connection = 0u64;
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if is_transient_accept_error(&err) => {
                    tracing::warn!(target: crate::TRACE_TARGET, error = %err, "accept failed; continuing");
                    if is_resource_exhaustion(&err) {
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                    continue;
                }
                Err(err) => {
                    tracing::error!(target: crate::TRACE_TARGET, error = %err, "listener failed");
                    return Err(err);
                }
            };
            let connection = next_connection;
            next_connection += 1;
            let service = self.service.clone();
            thread::Builder::new()
                .name(format!("jdwp-conn-{connection}"))
                .spawn(move || {
                    tracing::debug!(target: crate::TRACE_TARGET, %peer, connection, "accepted connection");
                    match service.serve_tcp(stream) {
                        Ok(outcome) => tracing::debug!(
                            target: crate::TRACE_TARGET,
                            %peer,
                            connection,
                            ?outcome,
                            "connection finished"
                        ),
                        Err(err) => tracing::debug!(
                            target: crate::TRACE_TARGET,
                            %peer,
                            connection,
                            error = %err,
                            "connection failed"
                        ),
                    }
                })?;
        }
    }

    /// Runs [`FakeDeviceServer::serve`] on a background thread.
    pub fn spawn(self) -> io::Result<(SocketAddr, thread::JoinHandle<io::Result<()>>)> {
        let addr = self.local_addr()?;
        let handle = thread::Builder::new()
            .name("jdwp-accept".to_string())
            .spawn(move || self.serve())?;
        Ok((addr, handle))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::device::ClientState;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn service(api_level: u32) -> JdwpService {
        let device = Arc::new(DeviceState::new("emulator-5554", api_level));
        device.start_client(ClientState::new(1234, 10_001, "com.example", "com.example", false));
        JdwpService::new(
            device,
            Arc::new(DispatchTable::with_defaults()),
            SessionSettings::default(),
        )
    }

    fn request(body: &str, rest: &[u8]) -> Duplex {
        let mut input = Vec::new();
        write_request(&mut input, body).unwrap();
        input.extend_from_slice(rest);
        Duplex {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    #[test]
    fn accept_errors_are_classified() {
        let transient = [
            io::Error::from(io::ErrorKind::ConnectionAborted),
            io::Error::from(io::ErrorKind::Interrupted),
            io::Error::from_raw_os_error(24),
        ];
        for err in &transient {
            assert!(is_transient_accept_error(err), "{err}");
        }
        assert!(is_resource_exhaustion(&io::Error::from_raw_os_error(23)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn unknown_pid_is_rejected() {
        let service = service(30);
        let mut stream = request("jdwp:999", &[]);
        let outcome = service.serve(&mut stream, &|| false).unwrap();

        assert!(matches!(outcome, ConnectionOutcome::Rejected(ref m) if m == "No client exists for pid: 999"));
        assert_eq!(&stream.output[..4], FAIL);
        assert_eq!(&stream.output[4..8], b"001d");
        assert_eq!(&stream.output[8..], b"No client exists for pid: 999");
    }

    #[test]
    fn handshake_mismatch_drops_silently_after_okay() {
        let service = service(30);
        let mut stream = request("jdwp:1234", b"NOT-A-HANDSHAK");
        let outcome = service.serve(&mut stream, &|| false).unwrap();

        assert!(matches!(outcome, ConnectionOutcome::HandshakeMismatch));
        assert_eq!(stream.output, OKAY);
        let client = service.device().client(1234).unwrap();
        assert!(!client.session().is_active());
    }

    #[test]
    fn legacy_device_rejects_second_session() {
        let service = service(27);
        let client = service.device().client(1234).unwrap();
        let _held = client.session().try_acquire().unwrap();

        let mut stream = request("jdwp:1234", &[]);
        let outcome = service.serve(&mut stream, &|| false).unwrap();
        assert!(matches!(
            outcome,
            ConnectionOutcome::Rejected(ref m) if m == "JDWP Session already opened for pid: 1234"
        ));
    }

    #[test]
    fn fail_reply_is_parsed_by_the_client_side() {
        let mut input = Vec::new();
        write_fail(&mut input, "nope").unwrap();
        let mut stream = Duplex {
            input: Cursor::new(input),
            output: Vec::new(),
        };
        match request_jdwp(&mut stream, 5) {
            Err(JdwpError::ServiceRejected(message)) => assert_eq!(message, "nope"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(stream.output, b"0006jdwp:5");
    }
}
