//! Byte-stuffed framing for the host serial link.
//!
//! ```text
//! START  body bytes (ESC before any START/STOP/ESC)  STOP
//! 0x12   ...                                         0x13
//! ```
//!
//! Decoding runs one byte at a time as bytes arrive from the transport:
//! - `Idle`: everything is ignored until a START byte
//! - `Active`: bytes accumulate until an unescaped STOP completes the frame
//!
//! # Example
//!
//! ```
//! use lorahome_dongle::serial::{encode, SerialDecoder, START, STOP};
//!
//! let encoded = encode(&[0x01, STOP, 0x02], 64).unwrap();
//! let mut decoder = SerialDecoder::new();
//! let frames = decoder.push(&encoded);
//! assert_eq!(frames.len(), 1);
//! assert_eq!(&frames[0][..], &[0x01, STOP, 0x02]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DongleError, Result};

/// Frame start sentinel.
pub const START: u8 = 0x12;

/// Frame end sentinel.
pub const STOP: u8 = 0x13;

/// Escape byte, placed before any sentinel appearing in the body.
pub const ESC: u8 = 0x14;

/// Largest decoded body the receiver accumulates.
pub const RX_BUFFER_SIZE: usize = 256;

#[inline]
fn is_reserved(byte: u8) -> bool {
    byte == START || byte == STOP || byte == ESC
}

/// Byte-stuff `raw` into a complete serial frame.
///
/// Fails with [`DongleError::FrameTooLarge`] if the encoded frame would be
/// longer than `max_frame_size`; nothing is produced in that case.
pub fn encode(raw: &[u8], max_frame_size: usize) -> Result<Bytes> {
    let escapes = raw.iter().filter(|&&b| is_reserved(b)).count();
    let size = raw.len() + escapes + 2;
    if size > max_frame_size {
        return Err(DongleError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u8(START);
    for &byte in raw {
        if is_reserved(byte) {
            buf.put_u8(ESC);
        }
        buf.put_u8(byte);
    }
    buf.put_u8(STOP);
    Ok(buf.freeze())
}

/// Receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Waiting for START.
    Idle,
    /// Accumulating a frame body.
    Active,
}

/// Incremental byte-stuffing decoder.
pub struct SerialDecoder {
    /// Body accumulated since START.
    buffer: BytesMut,
    /// Current receive state.
    state: DecoderState,
    /// Previous byte was ESC.
    escaped: bool,
    /// Largest body accepted before the frame is discarded.
    max_body: usize,
}

impl SerialDecoder {
    /// Create a decoder with the default 256-byte body limit.
    pub fn new() -> Self {
        Self::with_max_body(RX_BUFFER_SIZE)
    }

    /// Create a decoder with a custom body limit.
    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_body),
            state: DecoderState::Idle,
            escaped: false,
            max_body,
        }
    }

    /// Feed one byte, returning the body if it completed a frame.
    pub fn push_byte(&mut self, byte: u8) -> Option<Bytes> {
        match self.state {
            DecoderState::Idle => {
                if byte == START {
                    self.buffer.clear();
                    self.escaped = false;
                    self.state = DecoderState::Active;
                }
                None
            }
            DecoderState::Active => {
                if self.escaped {
                    self.escaped = false;
                } else if byte == ESC {
                    self.escaped = true;
                    return None;
                } else if byte == STOP {
                    self.state = DecoderState::Idle;
                    return Some(self.buffer.split().freeze());
                }

                if self.buffer.len() >= self.max_body {
                    tracing::debug!(
                        "Serial frame exceeds {} bytes without STOP, discarding",
                        self.max_body
                    );
                    self.reset();
                    return None;
                }
                self.buffer.put_u8(byte);
                None
            }
        }
    }

    /// Feed a chunk, returning every frame body it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        data.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Current receive state.
    #[inline]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Whether a frame is being accumulated.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == DecoderState::Active
    }

    /// Number of body bytes accumulated so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no body bytes are accumulated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial frame and return to `Idle`.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escaped = false;
        self.state = DecoderState::Idle;
    }
}

impl Default for SerialDecoder {
    fn default() -> Self {
        Self::new()
    }
}
