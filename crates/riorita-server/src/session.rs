//! Per-connection session.
//!
//! One task per accepted socket. The framed stream hands the session
//! whole request bodies; each is parsed, dispatched through the result
//! cache to the storage backend, and answered with a single framed write.
//! The next request is not read until the response is out, so work on a
//! connection never interleaves with itself.
//!
//! Any framing error, malformed request or storage I/O failure ends the
//! session without a response; corrupt stored data is the one storage
//! error that stays on the wire, reported as success with verdict 0.

use crate::codec::{encode_response, parse_request, Request, RequestType, RioritaCodec};
use crate::error::ServerResult;
use crate::server::ServerState;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Lifetime applied to values stored through the wire, in milliseconds.
/// The protocol carries no per-request lifetime.
pub const DEFAULT_LIFETIME_MS: i64 = 1_000_000_000;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Splits a wire key at the first `/` into `(section, name)`.
///
/// A key without a separator lands in the empty section under its full
/// name.
pub fn split_key(key: &Bytes) -> (Bytes, Bytes) {
    match key.iter().position(|&b| b == b'/') {
        Some(at) => (key.slice(..at), key.slice(at + 1..)),
        None => (Bytes::new(), key.clone()),
    }
}

/// Runs the request loop until the peer disconnects or errors out.
pub async fn run(stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) -> ServerResult<()> {
    debug!(peer = %addr, "session started");
    let mut framed = Framed::new(stream, RioritaCodec::new());

    while let Some(frame) = framed.next().await {
        let mut body = frame?;
        let request = parse_request(&mut body)?;
        let response = process(&state, request).await?;
        framed.send(response).await?;
    }

    debug!(peer = %addr, "session closed by peer");
    Ok(())
}

/// Executes one request and builds its response body.
async fn process(state: &ServerState, request: Request) -> ServerResult<BytesMut> {
    let Request {
        kind,
        id,
        key,
        value,
    } = request;

    if kind == RequestType::Ping {
        return Ok(encode_response(id, true, true, None));
    }

    let (section, name) = split_key(&key);
    let now = now_millis();

    let response = match kind {
        RequestType::Ping => unreachable!("handled above"),

        RequestType::Has => {
            let verdict =
                state.cache.has(&key) || state.storage.has(&section, &name, now).await;
            encode_response(id, true, verdict, None)
        }

        RequestType::Get => {
            if let Some(cached) = state.cache.get(&key) {
                encode_response(id, true, true, Some(&cached))
            } else {
                match state.storage.get(&section, &name, now).await {
                    Ok(Some(bytes)) => {
                        let bytes = Bytes::from(bytes);
                        state.cache.put(&key, bytes.clone());
                        encode_response(id, true, true, Some(&bytes))
                    }
                    Ok(None) => encode_response(id, true, false, None),
                    Err(riorita_storage::Error::CorruptRecord { .. }) => {
                        warn!(id, "corrupt record served as miss");
                        encode_response(id, true, false, None)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        RequestType::Put => {
            // The parser guarantees a value for PUT.
            let value = value.unwrap_or_default();
            let stored = state
                .storage
                .put(&section, &name, &value, now, DEFAULT_LIFETIME_MS, false)
                .await?;
            if stored {
                state.cache.put(&key, value);
            }
            encode_response(id, true, stored, None)
        }

        RequestType::Delete => {
            state.storage.erase(&section, &name, now).await?;
            state.cache.erase(&key);
            encode_response(id, true, true, None)
        }
    };

    Ok(response)
}
