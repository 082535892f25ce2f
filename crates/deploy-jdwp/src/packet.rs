use std::fmt;
use std::io::{Read, Write};

use crate::codec::JdwpReader;
use crate::{JdwpError, Result};

pub const HEADER_LEN: usize = 11;
pub const FLAG_REPLY: u8 = 0x80;

/// Upper bound for a single packet. Class redefinitions are the largest
/// payloads seen in practice and stay well below this.
pub const MAX_PACKET_BYTES: usize = 64 * 1024 * 1024;

/// DDMS chunks travel as JDWP commands in this vendor command set.
pub const DDMS_COMMAND_SET: u8 = 0xC7;
pub const DDMS_COMMAND: u8 = 0x01;
pub const DDM_CHUNK_HEADER_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId {
    pub command_set: u8,
    pub command: u8,
}

impl CommandId {
    pub const fn new(command_set: u8, command: u8) -> Self {
        Self {
            command_set,
            command,
        }
    }

    // VirtualMachine command set.
    pub const VM_VERSION: CommandId = CommandId::new(1, 1);
    pub const VM_ID_SIZES: CommandId = CommandId::new(1, 7);
    pub const VM_EXIT: CommandId = CommandId::new(1, 10);
    pub const DDMS: CommandId = CommandId::new(DDMS_COMMAND_SET, DDMS_COMMAND);
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.command_set, self.command)
    }
}

/// One JDWP packet. Command packets carry `command_set`/`command`; replies
/// (flag `0x80`) carry `error_code` in the same two header bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JdwpPacket {
    pub id: u32,
    pub flags: u8,
    pub command_set: u8,
    pub command: u8,
    pub error_code: u16,
    pub payload: Vec<u8>,
}

impl JdwpPacket {
    pub fn command(id: u32, command: CommandId, payload: Vec<u8>) -> Self {
        Self {
            id,
            flags: 0,
            command_set: command.command_set,
            command: command.command,
            error_code: 0,
            payload,
        }
    }

    pub fn reply(id: u32, error_code: u16, payload: Vec<u8>) -> Self {
        Self {
            id,
            flags: FLAG_REPLY,
            command_set: 0,
            command: 0,
            error_code,
            payload,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    pub fn command_id(&self) -> CommandId {
        CommandId::new(self.command_set, self.command)
    }

    /// Whether this command packet wraps a DDMS chunk. Only the header is
    /// inspected; the chunk itself is parsed by [`DdmPacket::from_jdwp`].
    pub fn is_ddm(&self) -> bool {
        !self.is_reply() && self.command_id() == CommandId::DDMS
    }

    /// Blocks until a full header is available, then reads exactly the
    /// announced payload. A peer closing mid-frame surfaces as
    /// [`std::io::ErrorKind::UnexpectedEof`].
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length < HEADER_LEN {
            return Err(JdwpError::Protocol(format!(
                "packet length {length} is shorter than the {HEADER_LEN}-byte header"
            )));
        }
        if length > MAX_PACKET_BYTES {
            return Err(JdwpError::Protocol(format!(
                "packet too large ({length} bytes, max {MAX_PACKET_BYTES})"
            )));
        }

        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let flags = header[8];
        let (command_set, command, error_code) = if flags & FLAG_REPLY != 0 {
            (0, 0, u16::from_be_bytes([header[9], header[10]]))
        } else {
            (header[9], header[10], 0)
        };

        let mut payload = vec![0u8; length - HEADER_LEN];
        reader.read_exact(&mut payload)?;

        Ok(Self {
            id,
            flags,
            command_set,
            command,
            error_code,
            payload,
        })
    }

    /// Serializes the header and payload. Fails for packets above
    /// [`MAX_PACKET_BYTES`], whose length would not be representable on the
    /// wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total = HEADER_LEN + self.payload.len();
        if total > MAX_PACKET_BYTES {
            return Err(JdwpError::Protocol(format!(
                "packet too large ({total} bytes, max {MAX_PACKET_BYTES})"
            )));
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.push(self.flags);
        if self.is_reply() {
            out.extend_from_slice(&self.error_code.to_be_bytes());
        } else {
            out.push(self.command_set);
            out.push(self.command);
        }
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()?)?;
        writer.flush()?;
        Ok(())
    }
}

/// Four ASCII characters packed big-endian, e.g. `HELO`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkType(pub u32);

impl ChunkType {
    pub const fn from_tag(tag: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*tag))
    }

    pub const HELO: ChunkType = ChunkType::from_tag(b"HELO");
    pub const FEAT: ChunkType = ChunkType::from_tag(b"FEAT");
    pub const WAIT: ChunkType = ChunkType::from_tag(b"WAIT");
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            bytes.iter().try_for_each(|b| write!(f, "{}", *b as char))
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

impl fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({self})")
    }
}

/// A DDMS chunk plus the id of the JDWP packet that carried it, which is
/// needed to address the reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DdmPacket {
    pub id: u32,
    pub chunk_type: ChunkType,
    pub payload: Vec<u8>,
}

impl DdmPacket {
    pub fn from_jdwp(packet: &JdwpPacket) -> Result<Self> {
        if !packet.is_ddm() {
            return Err(JdwpError::Protocol(format!(
                "packet {} is not a DDMS packet",
                packet.command_id()
            )));
        }

        let mut r = JdwpReader::new(&packet.payload);
        let chunk_type = ChunkType(r.read_u32()?);
        let length = r.read_u32()? as usize;
        if length > r.remaining() {
            return Err(JdwpError::Protocol(format!(
                "DDMS chunk {chunk_type} announces {length} bytes, packet carries {}",
                r.remaining()
            )));
        }
        let payload = r.read_bytes(length)?.to_vec();

        Ok(Self {
            id: packet.id,
            chunk_type,
            payload,
        })
    }

    fn encode_chunk(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DDM_CHUNK_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.chunk_type.0.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Wraps the chunk in a JDWP command packet (device → debugger traffic
    /// that is not a reply, e.g. `WAIT`).
    pub fn into_command(self) -> JdwpPacket {
        JdwpPacket::command(self.id, CommandId::DDMS, self.encode_chunk())
    }

    /// Wraps the chunk in a successful JDWP reply addressed to `self.id`.
    pub fn into_reply(self) -> JdwpPacket {
        JdwpPacket::reply(self.id, 0, self.encode_chunk())
    }
}
