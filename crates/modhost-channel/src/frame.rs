//! Whole-message framing over the FIFO byte streams.
//!
//! ```text
//! +----------------+------------------------------+
//! | Length (4)     | UTF-8 payload (Length bytes) |
//! | big-endian u32 |                              |
//! +----------------+------------------------------+
//! ```
//!
//! A FIFO is a byte stream, so the length prefix restores the message
//! boundaries the peer wrote. Payloads larger than the endpoint's buffer
//! capacity are refused on both sides.

use crate::error::ChannelError;

/// Size of the length prefix.
pub(crate) const HEADER_SIZE: usize = 4;

/// Encodes one message into a length-prefixed frame.
#[expect(clippy::big_endian_bytes, reason = "the length prefix is big-endian on the wire")]
pub(crate) fn encode(payload: &str, capacity: usize) -> Result<Vec<u8>, ChannelError> {
    let bytes = payload.as_bytes();
    let too_large = || ChannelError::FrameTooLarge {
        len: bytes.len(),
        capacity,
    };
    if bytes.len() > capacity {
        return Err(too_large());
    }
    let len = u32::try_from(bytes.len()).map_err(|_| too_large())?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + bytes.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(bytes);
    Ok(frame)
}

/// Buffers incoming bytes and yields complete payloads.
#[derive(Debug)]
pub(crate) struct FrameDecoder {
    buffer: Vec<u8>,
    capacity: usize,
}

impl FrameDecoder {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(8 * 1024)),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub(crate) fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Removes and returns the next complete payload, if one is buffered.
    #[expect(clippy::big_endian_bytes, reason = "the length prefix is big-endian on the wire")]
    pub(crate) fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let Some(header) = self.buffer.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let mut prefix = [0_u8; HEADER_SIZE];
        prefix.copy_from_slice(header);
        let len = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
        if len > self.capacity {
            return Err(ChannelError::FrameTooLarge {
                len,
                capacity: self.capacity,
            });
        }
        let end = HEADER_SIZE + len;
        if self.buffer.len() < end {
            return Ok(None);
        }
        let payload = self.buffer.drain(..end).skip(HEADER_SIZE).collect();
        Ok(Some(payload))
    }
}
