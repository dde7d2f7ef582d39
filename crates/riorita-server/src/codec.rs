//! Wire protocol: framing, request parsing, response encoding.
//!
//! Every request and response is prefixed by a little-endian i32 holding
//! the total size of the message including the prefix itself.
//!
//! Request body:
//!
//! ```text
//! ┌───────┬─────────┬──────┬─────────┬─────────┬─────┬──────────────────┐
//! │ magic │ version │ type │ id      │ key_len │ key │ [value_len value]│
//! │ 0x71  │ 1       │ u8   │ u64 LE  │ i32 LE  │ …   │ PUT only         │
//! └───────┴─────────┴──────┴─────────┴─────────┴─────┴──────────────────┘
//! ```
//!
//! Response body:
//!
//! ```text
//! ┌───────┬─────────┬────────┬─────────┬───────────────────────────────┐
//! │ magic │ version │ id     │ success │ [verdict [value_len value]]   │
//! │ 0x71  │ 1       │ u64 LE │ u8      │ value only for GET, verdict 1 │
//! └───────┴─────────┴────────┴─────────┴───────────────────────────────┘
//! ```
//!
//! A request that parses but leaves unconsumed bytes is malformed; the
//! session closes without answering. The declared total size must lie in
//! `[15, 2^30]`.

use crate::error::{ServerError, ServerResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: u8 = 0x71;
pub const PROTOCOL_VERSION: u8 = 1;

/// Smallest admissible declared total size.
pub const MIN_FRAME_SIZE: i64 = 15;

/// Largest admissible declared total size (1 GiB).
pub const MAX_FRAME_SIZE: i64 = 1 << 30;

/// Request kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Ping = 1,
    Has = 2,
    Get = 3,
    Put = 4,
    Delete = 5,
}

impl RequestType {
    pub fn from_u8(byte: u8) -> Option<RequestType> {
        match byte {
            1 => Some(RequestType::Ping),
            2 => Some(RequestType::Has),
            3 => Some(RequestType::Get),
            4 => Some(RequestType::Put),
            5 => Some(RequestType::Delete),
            _ => None,
        }
    }
}

/// One parsed request.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestType,
    /// Client-chosen correlation id, echoed in the response.
    pub id: u64,
    pub key: Bytes,
    /// Present exactly for PUT.
    pub value: Option<Bytes>,
}

/// Length-prefixed frame codec for the riorita protocol.
///
/// The decoder yields whole request bodies (prefix stripped); the encoder
/// prepends the prefix to response bodies so the response goes out in a
/// single write.
pub struct RioritaCodec {
    max_frame_size: i64,
}

impl Default for RioritaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RioritaCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl Decoder for RioritaCodec {
    type Item = BytesMut;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> ServerResult<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        // Total size, including these four bytes.
        let total = i64::from((&src[..4]).get_i32_le());
        if !(MIN_FRAME_SIZE..=self.max_frame_size).contains(&total) {
            return Err(ServerError::FrameSize(total));
        }

        let total = total as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(4);
        Ok(Some(src.split_to(total - 4)))
    }
}

impl Encoder<BytesMut> for RioritaCodec {
    type Error = ServerError;

    fn encode(&mut self, body: BytesMut, dst: &mut BytesMut) -> ServerResult<()> {
        let total = body.len() as i64 + 4;
        if total > self.max_frame_size {
            return Err(ServerError::FrameSize(total));
        }
        dst.reserve(body.len() + 4);
        dst.put_i32_le(total as i32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

/// Parses one request from a frame body, consuming it entirely.
pub fn parse_request(body: &mut BytesMut) -> ServerResult<Request> {
    if body.len() < 15 {
        return Err(ServerError::Malformed("body shorter than header"));
    }

    if body.get_u8() != MAGIC {
        return Err(ServerError::Malformed("bad magic byte"));
    }
    if body.get_u8() != PROTOCOL_VERSION {
        return Err(ServerError::Malformed("unsupported protocol version"));
    }
    let kind = RequestType::from_u8(body.get_u8())
        .ok_or(ServerError::Malformed("unknown request type"))?;
    let id = body.get_u64_le();

    let key_len = body.get_i32_le();
    if key_len < 0 {
        return Err(ServerError::Malformed("negative key length"));
    }
    let key_len = key_len as usize;
    if body.len() < key_len {
        return Err(ServerError::Malformed("key extends past frame"));
    }
    let key = body.split_to(key_len).freeze();

    let value = if kind == RequestType::Put {
        if body.len() < 4 {
            return Err(ServerError::Malformed("missing value length"));
        }
        let value_len = body.get_i32_le();
        if value_len < 0 {
            return Err(ServerError::Malformed("negative value length"));
        }
        let value_len = value_len as usize;
        if body.len() < value_len {
            return Err(ServerError::Malformed("value extends past frame"));
        }
        Some(body.split_to(value_len).freeze())
    } else {
        None
    };

    if !body.is_empty() {
        return Err(ServerError::Malformed("trailing bytes after request"));
    }

    Ok(Request {
        kind,
        id,
        key,
        value,
    })
}

/// Builds a response body for the frame encoder.
///
/// `value` must be given only for a GET answered with verdict 1; it is
/// the only case where the response carries data.
pub fn encode_response(id: u64, success: bool, verdict: bool, value: Option<&[u8]>) -> BytesMut {
    let payload = value.map(|v| v.len() + 4).unwrap_or(0);
    let mut body = BytesMut::with_capacity(1 + 1 + 8 + 1 + 1 + payload);
    body.put_u8(MAGIC);
    body.put_u8(PROTOCOL_VERSION);
    body.put_u64_le(id);
    body.put_u8(success as u8);
    if success {
        body.put_u8(verdict as u8);
        if let Some(value) = value {
            body.put_i32_le(value.len() as i32);
            body.put_slice(value);
        }
    }
    body
}
