// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Application messages and their payloads.
//!
//! A [`Message`] travels as three frames:
//!
//! ```text
//! +---------+---------------------------------------+---------+
//! | topic   | metadata                              | data    |
//! |         | len(4B BE) mimetype len(4B BE) replyTo|         |
//! +---------+---------------------------------------+---------+
//! ```
//!
//! Two-frame messages are reserved for the control channel and never
//! decode into a [`Message`].
//!
//! The payload kind is chosen at the call site through [`Payload`], a closed
//! set of supported types. Anything outside that set is raw bytes.

use crate::error::{Error, Result};
use crate::topic::Topic;

/// Mimetype strings identifying each [`Payload`] kind.
pub mod mimetype {
    /// 32-bit signed integer.
    pub const INT32: &str = "binary/sint32";
    /// 64-bit signed integer.
    pub const INT64: &str = "binary/sint64";
    /// 32-bit float.
    pub const FLOAT: &str = "binary/float";
    /// 64-bit float.
    pub const DOUBLE: &str = "binary/double";
    /// UTF-8 string.
    pub const STRING: &str = "text/string";
    /// Array of 32-bit signed integers.
    pub const INT32_ARRAY: &str = "binary/array-sint32";
    /// Array of 64-bit signed integers.
    pub const INT64_ARRAY: &str = "binary/array-sint64";
    /// Array of 32-bit floats.
    pub const FLOAT_ARRAY: &str = "binary/array-float";
    /// Array of 64-bit floats.
    pub const DOUBLE_ARRAY: &str = "binary/array-double";
    /// Opaque bytes.
    pub const BYTES: &str = "binary/bytes";
}

/// Supported payload kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Array of 32-bit signed integers.
    Int32Array(Vec<i32>),
    /// Array of 64-bit signed integers.
    Int64Array(Vec<i64>),
    /// Array of 32-bit floats.
    FloatArray(Vec<f32>),
    /// Array of 64-bit floats.
    DoubleArray(Vec<f64>),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl Payload {
    /// Mimetype advertised for this payload.
    pub fn mimetype(&self) -> &'static str {
        match self {
            Payload::Int32(_) => mimetype::INT32,
            Payload::Int64(_) => mimetype::INT64,
            Payload::Float(_) => mimetype::FLOAT,
            Payload::Double(_) => mimetype::DOUBLE,
            Payload::String(_) => mimetype::STRING,
            Payload::Int32Array(_) => mimetype::INT32_ARRAY,
            Payload::Int64Array(_) => mimetype::INT64_ARRAY,
            Payload::FloatArray(_) => mimetype::FLOAT_ARRAY,
            Payload::DoubleArray(_) => mimetype::DOUBLE_ARRAY,
            Payload::Bytes(_) => mimetype::BYTES,
        }
    }

    /// Big-endian encoding of the payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Int32(v) => v.to_be_bytes().to_vec(),
            Payload::Int64(v) => v.to_be_bytes().to_vec(),
            Payload::Float(v) => v.to_be_bytes().to_vec(),
            Payload::Double(v) => v.to_be_bytes().to_vec(),
            Payload::String(s) => s.as_bytes().to_vec(),
            Payload::Int32Array(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::Int64Array(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::FloatArray(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::DoubleArray(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::Bytes(b) => b.clone(),
        }
    }

    /// Decode `data` according to `mimetype`.
    pub fn decode(mimetype: &str, data: &[u8]) -> Result<Self> {
        match mimetype {
            mimetype::INT32 => Ok(Payload::Int32(i32::from_be_bytes(fixed(data)?))),
            mimetype::INT64 => Ok(Payload::Int64(i64::from_be_bytes(fixed(data)?))),
            mimetype::FLOAT => Ok(Payload::Float(f32::from_be_bytes(fixed(data)?))),
            mimetype::DOUBLE => Ok(Payload::Double(f64::from_be_bytes(fixed(data)?))),
            mimetype::STRING => String::from_utf8(data.to_vec())
                .map(Payload::String)
                .map_err(|e| Error::Payload(format!("invalid UTF-8 string: {}", e))),
            mimetype::INT32_ARRAY => array(data, i32::from_be_bytes).map(Payload::Int32Array),
            mimetype::INT64_ARRAY => array(data, i64::from_be_bytes).map(Payload::Int64Array),
            mimetype::FLOAT_ARRAY => array(data, f32::from_be_bytes).map(Payload::FloatArray),
            mimetype::DOUBLE_ARRAY => array(data, f64::from_be_bytes).map(Payload::DoubleArray),
            mimetype::BYTES => Ok(Payload::Bytes(data.to_vec())),
            other => Err(Error::Payload(format!("unsupported mimetype {:?}", other))),
        }
    }
}

fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.try_into().map_err(|_| {
        Error::Payload(format!("expected {} bytes, got {}", N, data.len()))
    })
}

fn array<const N: usize, T>(data: &[u8], convert: fn([u8; N]) -> T) -> Result<Vec<T>> {
    if data.len() % N != 0 {
        return Err(Error::Payload(format!(
            "array length {} is not a multiple of {}",
            data.len(),
            N
        )));
    }
    data.chunks_exact(N)
        .map(|chunk| fixed::<N>(chunk).map(convert))
        .collect()
}

macro_rules! payload_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Payload::$variant(value)
                }
            }
        )*
    };
}

payload_from! {
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<i32> => Int32Array,
    Vec<i64> => Int64Array,
    Vec<f32> => FloatArray,
    Vec<f64> => DoubleArray,
    Vec<u8> => Bytes,
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::String(value.to_string())
    }
}

/// Message metadata carried in the second frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Mimetype of the data frame.
    pub mimetype: String,
    /// Topic the receiver should answer on, for synchronous requests.
    pub reply_to: Option<String>,
}

impl Metadata {
    fn encode(&self) -> Vec<u8> {
        let reply_to = self.reply_to.as_deref().unwrap_or_default();
        let mut buf = Vec::with_capacity(8 + self.mimetype.len() + reply_to.len());
        put_str(&mut buf, &self.mimetype);
        put_str(&mut buf, reply_to);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let (mimetype, rest) = take_str(buf)?;
        let (reply_to, rest) = take_str(rest)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("trailing bytes in metadata".into()));
        }
        Ok(Self {
            mimetype,
            reply_to: (!reply_to.is_empty()).then_some(reply_to),
        })
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn take_str(buf: &[u8]) -> Result<(String, &[u8])> {
    if buf.len() < 4 {
        return Err(Error::Protocol("truncated metadata".into()));
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(Error::Protocol("truncated metadata string".into()));
    }
    let s = std::str::from_utf8(&rest[..len])
        .map_err(|e| Error::Protocol(format!("metadata is not UTF-8: {}", e)))?;
    Ok((s.to_string(), &rest[len..]))
}

/// An application message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: Topic,
    metadata: Metadata,
    data: Vec<u8>,
}

impl Message {
    /// Message with an explicit mimetype and raw data.
    pub fn new(topic: Topic, mimetype: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            topic,
            metadata: Metadata {
                mimetype: mimetype.into(),
                reply_to: None,
            },
            data,
        }
    }

    /// Message carrying a typed payload.
    ///
    /// ```
    /// use xmsg::{Message, Payload, Topic};
    ///
    /// let msg = Message::from_payload(Topic::build("calib")?, 42i32);
    /// assert_eq!(msg.payload()?, Payload::Int32(42));
    /// # Ok::<(), xmsg::Error>(())
    /// ```
    pub fn from_payload(topic: Topic, payload: impl Into<Payload>) -> Self {
        let payload = payload.into();
        Self::new(topic, payload.mimetype(), payload.encode())
    }

    /// Message topic.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Mimetype of the data.
    pub fn mimetype(&self) -> &str {
        &self.metadata.mimetype
    }

    /// Raw data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Metadata frame contents.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Reply topic, if this is a synchronous request.
    pub fn reply_to(&self) -> Option<&str> {
        self.metadata.reply_to.as_deref()
    }

    /// True when the sender waits for a response.
    pub fn has_reply_to(&self) -> bool {
        self.metadata.reply_to.is_some()
    }

    pub(crate) fn set_reply_to(&mut self, reply_to: impl Into<String>) {
        self.metadata.reply_to = Some(reply_to.into());
    }

    /// Decode the data according to the mimetype.
    pub fn payload(&self) -> Result<Payload> {
        Payload::decode(&self.metadata.mimetype, &self.data)
    }

    /// Build the response to a synchronous request.
    pub fn response(&self, payload: impl Into<Payload>) -> Result<Message> {
        let reply_to = self.reply_to().ok_or_else(|| {
            Error::InvalidState(format!("message on {} has no reply topic", self.topic))
        })?;
        Ok(Message::from_payload(Topic::wrap(reply_to), payload))
    }

    /// Wire frames `[topic, metadata, data]`.
    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        vec![
            self.topic.as_str().as_bytes().to_vec(),
            self.metadata.encode(),
            self.data.clone(),
        ]
    }

    /// Decode wire frames.
    pub fn from_frames(mut frames: Vec<Vec<u8>>) -> Result<Self> {
        if frames.len() != 3 {
            return Err(Error::Protocol(format!(
                "expected 3 frames, got {}",
                frames.len()
            )));
        }
        let data = frames.pop().unwrap_or_default();
        let metadata = Metadata::decode(&frames[1])?;
        let topic = String::from_utf8(std::mem::take(&mut frames[0]))
            .map_err(|e| Error::Protocol(format!("topic is not UTF-8: {}", e)))?;
        Ok(Self {
            topic: Topic::wrap(topic),
            metadata,
            data,
        })
    }
}
