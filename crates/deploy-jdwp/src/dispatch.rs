use std::collections::HashMap;
use std::io::{Read, Write};

use crate::device::{ClientState, DeviceState};
use crate::packet::{ChunkType, CommandId, DdmPacket, JdwpPacket};
use crate::{handlers, JdwpError, Result};

/// Whether the dispatch loop keeps reading after a handler returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Why a dispatch loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// A handler returned [`Flow::Stop`].
    HandlerStopped,
    /// Reading the next packet failed; usually the peer closed the socket.
    ReadFailed(JdwpError),
    /// A handler failed, typically while writing its reply.
    HandlerFailed(JdwpError),
}

/// What a handler sees of the connection it runs on.
pub struct HandlerContext<'a> {
    pub device: &'a DeviceState,
    pub client: &'a ClientState,
    writer: &'a mut dyn Write,
}

impl<'a> HandlerContext<'a> {
    pub fn new(device: &'a DeviceState, client: &'a ClientState, writer: &'a mut dyn Write) -> Self {
        Self {
            device,
            client,
            writer,
        }
    }

    pub fn send(&mut self, packet: &JdwpPacket) -> Result<()> {
        packet.write_to(&mut *self.writer)
    }
}

pub trait DdmHandler: Send + Sync {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &DdmPacket) -> Result<Flow>;
}

pub trait JdwpHandler: Send + Sync {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &JdwpPacket) -> Result<Flow>;
}

/// Routes packets to handlers: DDMS chunks by chunk type, everything else by
/// `(command_set, command)`. Unregistered keys are logged and skipped.
#[derive(Default)]
pub struct DispatchTable {
    ddm: HashMap<ChunkType, Box<dyn DdmHandler>>,
    jdwp: HashMap<CommandId, Box<dyn JdwpHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated with the handlers a fake device answers out of the box.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register_ddm(ChunkType::HELO, handlers::HeloHandler);
        table.register_ddm(ChunkType::FEAT, handlers::FeatHandler);
        table.register_jdwp(CommandId::VM_VERSION, handlers::VersionHandler);
        table.register_jdwp(CommandId::VM_ID_SIZES, handlers::IdSizesHandler);
        table.register_jdwp(CommandId::VM_EXIT, handlers::ExitHandler);
        table
    }

    pub fn register_ddm(&mut self, chunk_type: ChunkType, handler: impl DdmHandler + 'static) {
        self.ddm.insert(chunk_type, Box::new(handler));
    }

    pub fn register_jdwp(&mut self, command: CommandId, handler: impl JdwpHandler + 'static) {
        self.jdwp.insert(command, Box::new(handler));
    }

    pub fn dispatch(&self, ctx: &mut HandlerContext<'_>, packet: &JdwpPacket) -> Result<Flow> {
        if packet.is_reply() {
            tracing::debug!(
                target: crate::TRACE_TARGET,
                id = packet.id,
                error_code = packet.error_code,
                "ignoring reply packet from debugger"
            );
            return Ok(Flow::Continue);
        }

        if packet.is_ddm() {
            let ddm = DdmPacket::from_jdwp(packet)?;
            return match self.ddm.get(&ddm.chunk_type) {
                Some(handler) => handler.handle(ctx, &ddm),
                None => {
                    tracing::warn!(
                        target: crate::TRACE_TARGET,
                        pid = ctx.client.pid(),
                        chunk = %ddm.chunk_type,
                        "no handler for DDMS chunk; skipping"
                    );
                    Ok(Flow::Continue)
                }
            };
        }

        match self.jdwp.get(&packet.command_id()) {
            Some(handler) => handler.handle(ctx, packet),
            None => {
                tracing::warn!(
                    target: crate::TRACE_TARGET,
                    pid = ctx.client.pid(),
                    command = %packet.command_id(),
                    "no handler for JDWP command; skipping"
                );
                Ok(Flow::Continue)
            }
        }
    }

    /// Processes packets in arrival order until a handler stops the loop or
    /// the stream fails.
    pub fn run_loop<S: Read + Write>(
        &self,
        stream: &mut S,
        device: &DeviceState,
        client: &ClientState,
    ) -> LoopExit {
        loop {
            let packet = match JdwpPacket::read_from(stream) {
                Ok(packet) => packet,
                Err(err) => {
                    tracing::debug!(
                        target: crate::TRACE_TARGET,
                        pid = client.pid(),
                        error = %err,
                        "jdwp read failed; ending dispatch loop"
                    );
                    return LoopExit::ReadFailed(err);
                }
            };

            let mut ctx = HandlerContext::new(device, client, stream);
            match self.dispatch(&mut ctx, &packet) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return LoopExit::HandlerStopped,
                Err(err) => {
                    tracing::warn!(
                        target: crate::TRACE_TARGET,
                        pid = client.pid(),
                        command = %packet.command_id(),
                        error = %err,
                        "jdwp handler failed; ending dispatch loop"
                    );
                    return LoopExit::HandlerFailed(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn stream_of(packets: &[JdwpPacket]) -> Duplex {
        let mut input = Vec::new();
        for packet in packets {
            input.extend_from_slice(&packet.encode().unwrap());
        }
        Duplex {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    fn ddm_command(id: u32, chunk: ChunkType) -> JdwpPacket {
        DdmPacket {
            id,
            chunk_type: chunk,
            payload: Vec::new(),
        }
        .into_command()
    }

    struct Counting {
        seen: Arc<AtomicUsize>,
        flow: Flow,
    }

    impl DdmHandler for Counting {
        fn handle(&self, _ctx: &mut HandlerContext<'_>, _packet: &DdmPacket) -> Result<Flow> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(self.flow)
        }
    }

    impl JdwpHandler for Counting {
        fn handle(&self, _ctx: &mut HandlerContext<'_>, _packet: &JdwpPacket) -> Result<Flow> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(self.flow)
        }
    }

    fn fixture() -> (DeviceState, ClientState) {
        (
            DeviceState::new("test", 30),
            ClientState::new(42, 10_001, "com.example", "com.example", false),
        )
    }

    #[test]
    fn unknown_packets_do_not_end_the_loop() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut table = DispatchTable::new();
        table.register_jdwp(
            CommandId::new(1, 1),
            Counting {
                seen: seen.clone(),
                flow: Flow::Continue,
            },
        );

        let mut stream = stream_of(&[
            JdwpPacket::command(1, CommandId::new(99, 99), Vec::new()),
            ddm_command(2, ChunkType::from_tag(b"ZZZZ")),
            JdwpPacket::command(3, CommandId::new(1, 1), Vec::new()),
        ]);
        let (device, client) = fixture();

        let exit = table.run_loop(&mut stream, &device, &client);
        assert!(matches!(exit, LoopExit::ReadFailed(JdwpError::Io(_))));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_stop_ends_the_loop() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut table = DispatchTable::new();
        table.register_ddm(
            ChunkType::WAIT,
            Counting {
                seen: seen.clone(),
                flow: Flow::Stop,
            },
        );

        let mut stream = stream_of(&[ddm_command(1, ChunkType::WAIT), ddm_command(2, ChunkType::WAIT)]);
        let (device, client) = fixture();

        assert!(matches!(
            table.run_loop(&mut stream, &device, &client),
            LoopExit::HandlerStopped
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_ddm_chunk_fails_the_loop() {
        let table = DispatchTable::with_defaults();
        let mut stream = stream_of(&[JdwpPacket::command(1, CommandId::DDMS, vec![b'H', b'E'])]);
        let (device, client) = fixture();

        assert!(matches!(
            table.run_loop(&mut stream, &device, &client),
            LoopExit::HandlerFailed(JdwpError::Protocol(_))
        ));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn replies_from_debugger_are_skipped() {
        let table = DispatchTable::with_defaults();
        let mut stream = stream_of(&[
            JdwpPacket::reply(5, 0, Vec::new()),
            JdwpPacket::command(6, CommandId::VM_EXIT, vec![0, 0, 0, 0]),
        ]);
        let (device, client) = fixture();

        assert!(matches!(
            table.run_loop(&mut stream, &device, &client),
            LoopExit::HandlerStopped
        ));
        let reply = JdwpPacket::read_from(&mut Cursor::new(stream.output)).unwrap();
        assert_eq!(reply.id, 6);
        assert!(reply.is_reply());
    }
}
