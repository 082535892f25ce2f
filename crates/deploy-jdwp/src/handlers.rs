//! Handlers a fake device answers without any test-specific setup.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::codec::{utf16_len, JdwpWriter};
use crate::dispatch::{DdmHandler, Flow, HandlerContext, JdwpHandler};
use crate::packet::{ChunkType, DdmPacket, JdwpPacket};
use crate::Result;

/// DDM protocol version advertised in `HELO`.
pub const DDM_PROTOCOL_VERSION: u32 = 1;
const VM_IDENTIFIER: &str = "FakeVM";
const ID_SIZE: u32 = 8;

/// `WAIT` reason: the process is waiting for a debugger to attach.
pub const WAIT_FOR_DEBUGGER: u8 = 0;

// Commands the device originates get ids outside the range debuggers
// usually start from.
static NEXT_DEVICE_PACKET_ID: AtomicU32 = AtomicU32::new(0x4000_0000);

fn next_device_packet_id() -> u32 {
    NEXT_DEVICE_PACKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// `HELO`: process identity. Layout: version, pid, vm identifier length,
/// process name length, both names in UTF-16, then user id, ABI, JVM flags,
/// native-debuggable flag and package name.
///
/// A client started as waiting for a debugger follows the reply with a
/// `WAIT` command.
pub struct HeloHandler;

impl DdmHandler for HeloHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &DdmPacket) -> Result<Flow> {
        let client = ctx.client;
        let mut w = JdwpWriter::new();
        w.write_u32(DDM_PROTOCOL_VERSION);
        w.write_u32(client.pid());
        w.write_u32(utf16_len(VM_IDENTIFIER));
        w.write_u32(utf16_len(client.process_name()));
        w.write_utf16(VM_IDENTIFIER);
        w.write_utf16(client.process_name());
        w.write_u32(client.user_id());
        w.write_utf16_string(client.abi().unwrap_or_default());
        w.write_utf16_string(client.jvm_flags());
        w.write_bool(client.native_debuggable());
        w.write_utf16_string(client.package_name());

        let reply = DdmPacket {
            id: packet.id,
            chunk_type: packet.chunk_type,
            payload: w.into_vec(),
        };
        ctx.send(&reply.into_reply())?;

        if client.is_waiting() {
            let mut w = JdwpWriter::new();
            w.write_u8(WAIT_FOR_DEBUGGER);
            let wait = DdmPacket {
                id: next_device_packet_id(),
                chunk_type: ChunkType::WAIT,
                payload: w.into_vec(),
            };
            tracing::debug!(target: crate::TRACE_TARGET, pid = client.pid(), "client waiting for debugger");
            ctx.send(&wait.into_command())?;
        }
        Ok(Flow::Continue)
    }
}

/// `FEAT`: feature list, count followed by UTF-16 strings.
pub struct FeatHandler;

impl DdmHandler for FeatHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &DdmPacket) -> Result<Flow> {
        let features = ctx.client.features();
        let mut w = JdwpWriter::new();
        w.write_u32(features.len() as u32);
        for feature in features {
            w.write_utf16_string(feature);
        }

        let reply = DdmPacket {
            id: packet.id,
            chunk_type: packet.chunk_type,
            payload: w.into_vec(),
        };
        ctx.send(&reply.into_reply())?;
        Ok(Flow::Continue)
    }
}

/// VirtualMachine.Version
pub struct VersionHandler;

impl JdwpHandler for VersionHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &JdwpPacket) -> Result<Flow> {
        let mut w = JdwpWriter::new();
        w.write_string(&format!(
            "{VM_IDENTIFIER} (device {}, API {})",
            ctx.device.serial(),
            ctx.device.api_level()
        ));
        w.write_i32(1);
        w.write_i32(6);
        w.write_string("0");
        w.write_string(VM_IDENTIFIER);
        ctx.send(&JdwpPacket::reply(packet.id, 0, w.into_vec()))?;
        Ok(Flow::Continue)
    }
}

/// VirtualMachine.IDSizes: field, method, object, reference type and frame
/// id sizes.
pub struct IdSizesHandler;

impl JdwpHandler for IdSizesHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &JdwpPacket) -> Result<Flow> {
        let mut w = JdwpWriter::new();
        for _ in 0..5 {
            w.write_u32(ID_SIZE);
        }
        ctx.send(&JdwpPacket::reply(packet.id, 0, w.into_vec()))?;
        Ok(Flow::Continue)
    }
}

/// VirtualMachine.Exit: acknowledge, then end the session.
pub struct ExitHandler;

impl JdwpHandler for ExitHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, packet: &JdwpPacket) -> Result<Flow> {
        ctx.send(&JdwpPacket::reply(packet.id, 0, Vec::new()))?;
        tracing::debug!(target: crate::TRACE_TARGET, pid = ctx.client.pid(), "debugger requested exit");
        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::JdwpReader;
    use crate::device::{ClientState, DeviceState};
    use crate::packet::CommandId;

    use super::*;

    fn run<H: DdmHandler>(handler: H, client: &ClientState, chunk: ChunkType) -> DdmPacket {
        let device = DeviceState::new("emulator-5554", 33);
        let mut out = Vec::new();
        let packet = DdmPacket {
            id: 77,
            chunk_type: chunk,
            payload: Vec::new(),
        };
        let mut ctx = HandlerContext::new(&device, client, &mut out);
        assert_eq!(handler.handle(&mut ctx, &packet).unwrap(), Flow::Continue);

        let reply = JdwpPacket::read_from(&mut out.as_slice()).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.id, 77);
        // Replies reuse the DDMS chunk framing inside the JDWP payload.
        let mut r = JdwpReader::new(&reply.payload);
        assert_eq!(ChunkType(r.read_u32().unwrap()), chunk);
        let len = r.read_u32().unwrap() as usize;
        DdmPacket {
            id: reply.id,
            chunk_type: chunk,
            payload: r.read_bytes(len).unwrap().to_vec(),
        }
    }

    #[test]
    fn helo_describes_the_client() {
        let client = ClientState::new(1234, 1_010_045, "com.example:remote", "com.example", false)
            .with_abi("64-bit")
            .with_native_debuggable(true);
        let reply = run(HeloHandler, &client, ChunkType::HELO);

        let mut r = JdwpReader::new(&reply.payload);
        assert_eq!(r.read_u32().unwrap(), DDM_PROTOCOL_VERSION);
        assert_eq!(r.read_u32().unwrap(), 1234);
        let vm_len = r.read_u32().unwrap() as usize;
        let name_len = r.read_u32().unwrap() as usize;
        assert_eq!(r.read_utf16(vm_len).unwrap(), "FakeVM");
        assert_eq!(r.read_utf16(name_len).unwrap(), "com.example:remote");
        assert_eq!(r.read_u32().unwrap(), 10);
        assert_eq!(r.read_utf16_string().unwrap(), "64-bit");
        assert_eq!(r.read_utf16_string().unwrap(), "");
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_utf16_string().unwrap(), "com.example");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn helo_for_waiting_client_is_followed_by_wait() {
        let device = DeviceState::new("emulator-5554", 33);
        let client = ClientState::new(55, 10_055, "com.example", "com.example", true);
        let mut out = Vec::new();
        let packet = DdmPacket {
            id: 3,
            chunk_type: ChunkType::HELO,
            payload: Vec::new(),
        };
        let mut ctx = HandlerContext::new(&device, &client, &mut out);
        HeloHandler.handle(&mut ctx, &packet).unwrap();

        let mut stream = out.as_slice();
        let reply = JdwpPacket::read_from(&mut stream).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.id, 3);

        let wait = DdmPacket::from_jdwp(&JdwpPacket::read_from(&mut stream).unwrap()).unwrap();
        assert_eq!(wait.chunk_type, ChunkType::WAIT);
        assert_eq!(wait.payload, [WAIT_FOR_DEBUGGER]);
        assert_ne!(wait.id, 3);
        assert!(stream.is_empty());
    }

    #[test]
    fn helo_for_running_client_sends_only_the_reply() {
        let client = ClientState::new(56, 10_056, "com.example", "com.example", false);
        let device = DeviceState::new("emulator-5554", 33);
        let mut out = Vec::new();
        let packet = DdmPacket {
            id: 4,
            chunk_type: ChunkType::HELO,
            payload: Vec::new(),
        };
        let mut ctx = HandlerContext::new(&device, &client, &mut out);
        HeloHandler.handle(&mut ctx, &packet).unwrap();

        let mut stream = out.as_slice();
        JdwpPacket::read_from(&mut stream).unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn feat_lists_client_features() {
        let client = ClientState::new(1, 0, "p", "p", false)
            .with_features(["method-trace-profiling", "view-hierarchy"]);
        let reply = run(FeatHandler, &client, ChunkType::FEAT);

        let mut r = JdwpReader::new(&reply.payload);
        assert_eq!(r.read_u32().unwrap(), 2);
        assert_eq!(r.read_utf16_string().unwrap(), "method-trace-profiling");
        assert_eq!(r.read_utf16_string().unwrap(), "view-hierarchy");
    }

    #[test]
    fn exit_acknowledges_then_stops() {
        let device = DeviceState::new("serial", 30);
        let client = ClientState::new(1, 0, "p", "p", false);
        let mut out = Vec::new();
        let mut ctx = HandlerContext::new(&device, &client, &mut out);
        let packet = JdwpPacket::command(9, CommandId::VM_EXIT, vec![0; 4]);
        assert_eq!(ExitHandler.handle(&mut ctx, &packet).unwrap(), Flow::Stop);

        let reply = JdwpPacket::read_from(&mut out.as_slice()).unwrap();
        assert_eq!((reply.id, reply.error_code), (9, 0));
    }
}
