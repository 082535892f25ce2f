use std::io::{Read, Write};

use crate::{JdwpError, Result};

pub const HANDSHAKE: &[u8] = b"JDWP-Handshake";

/// Result of the server side of the JDWP handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handshake {
    Completed,
    /// The peer sent something other than [`HANDSHAKE`]. Nothing was written
    /// back; legacy clients expect the connection to simply go away.
    Mismatch,
}

/// Reads the debugger's handshake and echoes it back on a match.
pub fn handshake<S: Read + Write + ?Sized>(stream: &mut S) -> Result<Handshake> {
    let mut received = [0u8; HANDSHAKE.len()];
    stream.read_exact(&mut received)?;
    if received != HANDSHAKE {
        tracing::debug!(
            target: crate::TRACE_TARGET,
            received = ?String::from_utf8_lossy(&received),
            "jdwp handshake mismatch; dropping connection"
        );
        return Ok(Handshake::Mismatch);
    }
    stream.write_all(HANDSHAKE)?;
    stream.flush()?;
    Ok(Handshake::Completed)
}

/// Debugger side of the handshake: send the magic, expect it echoed.
pub fn client_handshake<S: Read + Write + ?Sized>(stream: &mut S) -> Result<()> {
    stream.write_all(HANDSHAKE)?;
    stream.flush()?;

    let mut reply = [0u8; HANDSHAKE.len()];
    stream.read_exact(&mut reply)?;
    if reply != HANDSHAKE {
        return Err(JdwpError::HandshakeFailed);
    }
    Ok(())
}

#[derive(Default)]
pub struct JdwpWriter {
    buf: Vec<u8>,
}

impl JdwpWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// JDWP strings are UTF-8 prefixed with a u32 byte count.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Raw UTF-16BE code units, no length prefix. DDMS puts several string
    /// lengths up front and the characters afterwards.
    pub fn write_utf16(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.write_u16(unit);
        }
    }

    /// DDMS strings: u32 count of UTF-16 code units, then the code units.
    pub fn write_utf16_string(&mut self, s: &str) {
        self.write_u32(utf16_len(s));
        self.write_utf16(s);
    }
}

pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

pub struct JdwpReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> JdwpReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn require(&self, n: usize) -> Result<()> {
        let end = self.pos.checked_add(n);
        match end {
            Some(end) if end <= self.buf.len() => Ok(()),
            _ => Err(JdwpError::Protocol(format!(
                "buffer underflow: need {n} bytes at {}, have {}",
                self.pos,
                self.buf.len()
            ))),
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = u32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| JdwpError::Protocol(format!("invalid utf-8 string: {e}")))
    }

    /// Reads `units` UTF-16BE code units.
    pub fn read_utf16(&mut self, units: usize) -> Result<String> {
        let byte_len = units
            .checked_mul(2)
            .ok_or_else(|| JdwpError::Protocol(format!("utf-16 length overflow ({units})")))?;
        self.require(byte_len)?;
        let mut out = Vec::with_capacity(units);
        for _ in 0..units {
            out.push(self.read_u16()?);
        }
        String::from_utf16(&out).map_err(|_| JdwpError::InvalidUtf16)
    }

    pub fn read_utf16_string(&mut self) -> Result<String> {
        let units = self.read_u32()? as usize;
        self.read_utf16(units)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(len)?;
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}
