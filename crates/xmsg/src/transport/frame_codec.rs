// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Multi-frame codec for xMsg TCP links.
//!
//! TCP is a stream protocol without message boundaries. Every xMsg message is
//! a short list of frames, framed as:
//!
//! ```text
//! +---------------+----------------+---------+----------------+---------+
//! | Count (4B BE) | Length (4B BE) | Frame 0 | Length (4B BE) | Frame 1 | ...
//! +---------------+----------------+---------+----------------+---------+
//! ```
//!
//! # Example
//!
//! ```
//! use xmsg::transport::FrameCodec;
//!
//! let wire = FrameCodec::encode(&[b"topic".as_slice(), b"data".as_slice()]);
//! let mut codec = FrameCodec::new(1024);
//! let frames = codec.read_message(&mut wire.as_slice()).unwrap();
//! assert_eq!(frames, vec![b"topic".to_vec(), b"data".to_vec()]);
//! ```

use std::io::{self, Read};

/// Frame count and frame length header size.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Upper bound on the number of frames in one message.
pub const MAX_FRAMES: usize = 64;

/// A decoded multi-frame message.
pub type Frames = Vec<Vec<u8>>;

/// Blocking multi-frame codec.
#[derive(Debug)]
pub struct FrameCodec {
    /// Maximum allowed frame size (anti-OOM protection)
    max_size: usize,

    /// Statistics: messages decoded
    messages_decoded: u64,

    /// Statistics: messages rejected (too large, too many frames)
    messages_rejected: u64,
}

impl FrameCodec {
    /// Create a codec with the given maximum frame size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            messages_decoded: 0,
            messages_rejected: 0,
        }
    }

    /// Maximum allowed frame size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of messages successfully decoded.
    pub fn messages_decoded(&self) -> u64 {
        self.messages_decoded
    }

    /// Number of messages rejected.
    pub fn messages_rejected(&self) -> u64 {
        self.messages_rejected
    }

    /// Encode a list of frames into one wire buffer.
    pub fn encode<F: AsRef<[u8]>>(frames: &[F]) -> Vec<u8> {
        let total: usize = frames
            .iter()
            .map(|f| FRAME_HEADER_SIZE + f.as_ref().len())
            .sum();
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + total);
        buf.extend_from_slice(&(frames.len() as u32).to_be_bytes());
        for frame in frames {
            let frame = frame.as_ref();
            buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
            buf.extend_from_slice(frame);
        }
        buf
    }

    /// Read one complete message, blocking until it arrives.
    ///
    /// A clean EOF before the first byte yields `UnexpectedEof` with the
    /// message "connection closed".
    pub fn read_message<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Frames> {
        let count = match read_u32(reader) {
            Ok(count) => count as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ));
            }
            Err(e) => return Err(e),
        };
        if count == 0 || count > MAX_FRAMES {
            self.messages_rejected += 1;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame count {} (max {})", count, MAX_FRAMES),
            ));
        }

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u32(reader)? as usize;
            if len > self.max_size {
                self.messages_rejected += 1;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame too large: {} bytes (max {})", len, self.max_size),
                ));
            }
            let mut frame = vec![0u8; len];
            reader.read_exact(&mut frame)?;
            frames.push(frame);
        }
        self.messages_decoded += 1;
        Ok(frames)
    }
}

fn read_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let wire = FrameCodec::encode(&[b"ab".as_slice()]);
        assert_eq!(&wire[..4], &1u32.to_be_bytes());
        assert_eq!(&wire[4..8], &2u32.to_be_bytes());
        assert_eq!(&wire[8..], b"ab");
    }

    #[test]
    fn test_read_back_to_back_messages() {
        let mut wire = FrameCodec::encode(&[b"one".as_slice()]);
        wire.extend(FrameCodec::encode(&[b"two".as_slice(), b"".as_slice()]));
        let mut codec = FrameCodec::new(64);
        let mut reader = wire.as_slice();

        assert_eq!(codec.read_message(&mut reader).unwrap(), vec![b"one".to_vec()]);
        assert_eq!(
            codec.read_message(&mut reader).unwrap(),
            vec![b"two".to_vec(), Vec::new()]
        );
        let err = codec.read_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(codec.messages_decoded(), 2);
    }

    #[test]
    fn test_reject_oversized_frame() {
        let wire = FrameCodec::encode(&[vec![0u8; 100]]);
        let mut codec = FrameCodec::new(10);
        let err = codec.read_message(&mut wire.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(codec.messages_rejected(), 1);
    }

    #[test]
    fn test_reject_zero_frames() {
        let wire = 0u32.to_be_bytes();
        let mut codec = FrameCodec::new(10);
        assert!(codec.read_message(&mut wire.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_body() {
        let mut wire = FrameCodec::encode(&[b"hello".as_slice()]);
        wire.truncate(wire.len() - 2);
        let mut codec = FrameCodec::new(64);
        assert!(codec.read_message(&mut wire.as_slice()).is_err());
    }
}
