use crate::error::BinaryError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Cursor over an immutable byte buffer, used to decode wire frames.
///
/// All multi-byte primitives are read big-endian, matching the wire layout
/// the codec module builds on top of this reader.
#[derive(Debug, Clone)]
pub struct BinaryReader {
    buffer: Bytes,
}

impl BinaryReader {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    fn require(&self, wanted: usize) -> Result<(), BinaryError> {
        if self.buffer.remaining() < wanted {
            Err(BinaryError::UnexpectedEof {
                wanted,
                remaining: self.buffer.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, BinaryError> {
        self.require(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, BinaryError> {
        self.require(2)?;
        Ok(self.buffer.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, BinaryError> {
        self.require(4)?;
        Ok(self.buffer.get_u32())
    }

    /// Consumes and returns the remainder of the buffer.
    pub fn read_rest(&mut self) -> Bytes {
        self.buffer.split_to(self.buffer.remaining())
    }

    pub fn read_exact(&mut self, len: usize) -> Result<Bytes, BinaryError> {
        self.require(len)?;
        Ok(self.buffer.copy_to_bytes(len))
    }
}

/// Accumulates a wire frame before it is sent, big-endian throughout.
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    buffer: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }
}
