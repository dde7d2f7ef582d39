//! riorita wire protocol server.
//!
//! Implements the length-prefixed binary protocol over TCP: framing and
//! request/response codecs, the per-connection session loop, and the
//! accepting server with its IPv4 allow-list. Storage lives in
//! `riorita-storage`; this crate only drives it.

pub mod allow;
pub mod codec;
pub mod error;
pub mod server;
pub mod session;

pub use allow::AllowList;
pub use codec::{Request, RequestType, RioritaCodec};
pub use error::{ServerError, ServerResult};
pub use server::{bind, BoundServer, ServerConfig, ServerState};
