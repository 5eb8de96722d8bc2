//! Message framing.
//!
//! A [`Packer`] turns an application message into wire bytes; an
//! [`Unpacker`] pulls complete messages back out of a receive buffer,
//! reporting "need more bytes" and "malformed" distinctly.
//!
//! Two strategies are provided:
//!
//! - [`LengthPacker`] / [`LengthUnpacker`]: a 2-byte big-endian header
//!   carrying the total frame length (header included). A header-only frame
//!   is a heartbeat.
//! - [`RawPacker`] / [`RawUnpacker`]: no framing at all; every received chunk
//!   is one message.

use crate::error::CodecError;

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length header.
pub const HEADER_LEN: usize = 2;

/// Default upper bound on a framed message, header included.
pub const DEFAULT_MAX_MSG_LEN: usize = 4000;

/// Result of one [`Unpacker::unpack`] step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unpacked {
    Message(Bytes),
    Heartbeat,
    /// No complete frame is buffered yet.
    Incomplete,
}

pub trait Packer: Send + Sync {
    /// Frame one message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the message cannot be framed.
    fn pack(&self, msg: &[u8]) -> Result<Bytes, CodecError>;

    /// Wire bytes of a heartbeat, if this framing has one.
    fn heartbeat(&self) -> Option<Bytes> {
        None
    }

    fn reset(&self) {}
}

pub trait Unpacker: Send {
    /// Take at most one frame from the front of `buf`.
    ///
    /// Consumed bytes are split off `buf`; an incomplete frame is left in
    /// place for the next read to extend.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] or [`CodecError::TooLarge`] when the
    /// buffered bytes can never form a valid frame.
    fn unpack(&mut self, buf: &mut BytesMut) -> Result<Unpacked, CodecError>;

    fn reset(&mut self) {}
}

/// Length-prefixed framing.
#[derive(Debug, Clone)]
pub struct LengthPacker {
    max_msg_len: usize,
}

impl LengthPacker {
    pub fn new(max_msg_len: usize) -> Self {
        Self {
            max_msg_len: max_msg_len.min(usize::from(u16::MAX)),
        }
    }
}

impl Default for LengthPacker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MSG_LEN)
    }
}

impl Packer for LengthPacker {
    fn pack(&self, msg: &[u8]) -> Result<Bytes, CodecError> {
        let total = msg.len() + HEADER_LEN;
        if total > self.max_msg_len {
            return Err(CodecError::TooLarge {
                size: total,
                max: self.max_msg_len,
            });
        }
        let mut frame = BytesMut::with_capacity(total);
        // Bounded by max_msg_len, which never exceeds u16::MAX.
        frame.put_u16(total as u16);
        frame.put_slice(msg);
        Ok(frame.freeze())
    }

    fn heartbeat(&self) -> Option<Bytes> {
        Some(Bytes::from_static(&[0, HEADER_LEN as u8]))
    }
}

#[derive(Debug, Clone)]
pub struct LengthUnpacker {
    max_msg_len: usize,
}

impl LengthUnpacker {
    pub fn new(max_msg_len: usize) -> Self {
        Self { max_msg_len }
    }
}

impl Default for LengthUnpacker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MSG_LEN)
    }
}

impl Unpacker for LengthUnpacker {
    fn unpack(&mut self, buf: &mut BytesMut) -> Result<Unpacked, CodecError> {
        if buf.len() < HEADER_LEN {
            return Ok(Unpacked::Incomplete);
        }

        let total = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if total < HEADER_LEN {
            return Err(CodecError::malformed(format!(
                "frame length {total} shorter than header"
            )));
        }
        if total > self.max_msg_len {
            return Err(CodecError::TooLarge {
                size: total,
                max: self.max_msg_len,
            });
        }
        if buf.len() < total {
            return Ok(Unpacked::Incomplete);
        }

        let mut frame = buf.split_to(total);
        if total == HEADER_LEN {
            return Ok(Unpacked::Heartbeat);
        }
        let _ = frame.split_to(HEADER_LEN);
        Ok(Unpacked::Message(frame.freeze()))
    }
}

/// Pass-through framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPacker;

impl Packer for RawPacker {
    fn pack(&self, msg: &[u8]) -> Result<Bytes, CodecError> {
        if msg.is_empty() {
            return Err(CodecError::malformed("empty message"));
        }
        Ok(Bytes::copy_from_slice(msg))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawUnpacker;

impl Unpacker for RawUnpacker {
    fn unpack(&mut self, buf: &mut BytesMut) -> Result<Unpacked, CodecError> {
        if buf.is_empty() {
            Ok(Unpacked::Incomplete)
        } else {
            Ok(Unpacked::Message(buf.split().freeze()))
        }
    }
}
