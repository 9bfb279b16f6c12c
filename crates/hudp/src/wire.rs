//! Wire framing and parsing.
//!
//! Two frame shapes share a one-byte channel prefix:
//!
//! ```text
//! Data frame: channel:u8 | seq:u16 be | timestamp:u32 be | payload:bytes   (7-byte header)
//! ACK frame:  channel:u8(=0) | flag:u8(=0xFF) | seq:u16 be | timestamp:u32 be  (8 bytes, no payload)
//! ```
//!
//! A datagram is an ACK iff its second byte is `ACK_FLAG` *and* its total
//! length equals `ACK_FRAME_LEN` exactly -- a data frame's sequence high byte
//! can legitimately be `0xFF`, so length is what disambiguates.

use bytes::Bytes;
use hudp_binary::io::{BinaryReader, BinaryWriter};
use thiserror::Error;

pub const ACK_FLAG: u8 = 0xFF;
pub const DATA_HEADER_LEN: usize = 7;
pub const ACK_FRAME_LEN: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("unknown channel byte {0:#04x}")]
    UnknownChannel(u8),
}

/// One of the four logical channels multiplexed over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Reliable = 0,
    Unreliable = 1,
    Register = 2,
    Deregister = 3,
}

impl Channel {
    pub fn from_u8(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(Channel::Reliable),
            1 => Ok(Channel::Unreliable),
            2 => Ok(Channel::Register),
            3 => Ok(Channel::Deregister),
            other => Err(WireError::UnknownChannel(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Reliable-class channels participate in the sender's in-flight table
    /// and are ACKed by the receiver; unreliable frames never are.
    pub fn is_reliable_class(self) -> bool {
        !matches!(self, Channel::Unreliable)
    }
}

/// A decoded data frame (`RELIABLE`, `UNRELIABLE`, `REGISTER`, or `DEREGISTER`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub channel: Channel,
    pub seq: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

impl DataFrame {
    pub fn encode(&self) -> Bytes {
        let mut writer = BinaryWriter::new();
        writer.write_u8(self.channel.as_u8());
        writer.write_u16(self.seq);
        writer.write_u32(self.timestamp);
        writer.write_bytes(&self.payload);
        writer.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < DATA_HEADER_LEN {
            return Err(WireError::TooShort {
                len: data.len(),
                min: DATA_HEADER_LEN,
            });
        }
        let mut reader = BinaryReader::new(Bytes::copy_from_slice(data));
        let channel = Channel::from_u8(reader.read_u8().expect("length checked above"))?;
        let seq = reader.read_u16().expect("length checked above");
        let timestamp = reader.read_u32().expect("length checked above");
        let payload = reader.read_rest();
        Ok(Self {
            channel,
            seq,
            timestamp,
            payload,
        })
    }
}

/// A decoded ACK frame. Always echoes the `RELIABLE` channel byte on the
/// wire regardless of which reliable-class channel it is acknowledging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub seq: u16,
    pub timestamp: u32,
}

impl AckFrame {
    pub fn encode(&self) -> Bytes {
        let mut writer = BinaryWriter::new();
        writer.write_u8(Channel::Reliable.as_u8());
        writer.write_u8(ACK_FLAG);
        writer.write_u16(self.seq);
        writer.write_u32(self.timestamp);
        writer.freeze()
    }

    fn decode(data: &[u8]) -> Self {
        let mut reader = BinaryReader::new(Bytes::copy_from_slice(data));
        let _channel = reader.read_u8().expect("length checked by caller");
        let _flag = reader.read_u8().expect("length checked by caller");
        let seq = reader.read_u16().expect("length checked by caller");
        let timestamp = reader.read_u32().expect("length checked by caller");
        Self { seq, timestamp }
    }
}

/// Result of classifying a raw datagram before full decoding.
pub enum Frame {
    Ack(AckFrame),
    Data(DataFrame),
}

/// Disambiguates and decodes a raw datagram per the ACK-length rule above.
pub fn decode_frame(data: &[u8]) -> Result<Frame, WireError> {
    if data.len() == ACK_FRAME_LEN && data.get(1) == Some(&ACK_FLAG) {
        return Ok(Frame::Ack(AckFrame::decode(data)));
    }
    Ok(Frame::Data(DataFrame::decode(data)?))
}
