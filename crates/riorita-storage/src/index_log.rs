//! The index log: an append-only journal of directory updates.
//!
//! Every put and erase appends one record to `{root}/riorita.index`. The
//! log is the sole source of truth at recovery: replaying it from the
//! start rebuilds the in-memory directory and the per-shard write
//! positions. Data files are never scanned.
//!
//! ## Record format
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬─────────┬──────────────┐
//! │ sect_len │ section │ name_len │ name    │ Position     │
//! │ (i32 LE) │ (bytes) │ (i32 LE) │ (bytes) │ (32 bytes)   │
//! └──────────┴─────────┴──────────┴─────────┴──────────────┘
//! ```
//!
//! There is no file header or trailer.
//!
//! ## Torn writes
//!
//! A record is always formatted into a single buffer and issued as one
//! write on a freshly opened append-mode handle, so a reader never
//! observes a record spanning a write boundary. A crash can still leave a
//! partial record at the tail; replay stops there, keeps every record
//! before it (exactly the prefix that reached the file), and truncates
//! the file to that prefix so that later appends remain replayable.

use crate::error::Result;
use crate::position::{Position, POSITION_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// File name of the index log under the storage root.
pub const INDEX_FILE: &str = "riorita.index";

/// Replay read granularity.
const BLOCK_SIZE: usize = 1024 * 1024;

/// One decoded index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub section: Bytes,
    pub name: Bytes,
    pub position: Position,
}

/// Outcome of decoding one record from a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A whole record, plus the number of bytes it occupied.
    Record(IndexRecord, usize),
    /// The buffer ends inside a record.
    Incomplete,
    /// The bytes at this point cannot be a record.
    Malformed,
}

/// Decodes one record starting at `buf[at..]`.
///
/// Declared lengths are never allowed to extend past the buffer: a
/// truncated tail decodes as [`Decoded::Incomplete`], a negative length
/// as [`Decoded::Malformed`].
pub fn decode_record(buf: &[u8], at: usize) -> Decoded {
    let mut cur = &buf[at..];

    if cur.remaining() < 4 {
        return Decoded::Incomplete;
    }
    let sect_len = cur.get_i32_le();
    if sect_len < 0 {
        return Decoded::Malformed;
    }
    let sect_len = sect_len as usize;
    if cur.remaining() < sect_len {
        return Decoded::Incomplete;
    }
    let section = Bytes::copy_from_slice(&cur[..sect_len]);
    cur.advance(sect_len);

    if cur.remaining() < 4 {
        return Decoded::Incomplete;
    }
    let name_len = cur.get_i32_le();
    if name_len < 0 {
        return Decoded::Malformed;
    }
    let name_len = name_len as usize;
    if cur.remaining() < name_len {
        return Decoded::Incomplete;
    }
    let name = Bytes::copy_from_slice(&cur[..name_len]);
    cur.advance(name_len);

    if cur.remaining() < POSITION_SIZE {
        return Decoded::Incomplete;
    }
    let position = Position::decode(&mut cur);

    let consumed = 4 + sect_len + 4 + name_len + POSITION_SIZE;
    Decoded::Record(
        IndexRecord {
            section,
            name,
            position,
        },
        consumed,
    )
}

/// Append-only writer and replayer for the index log.
pub struct IndexLog {
    path: PathBuf,
    sync: bool,
}

impl IndexLog {
    pub fn new(root: &Path, sync: bool) -> Self {
        Self {
            path: root.join(INDEX_FILE),
            sync,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record.
    ///
    /// The whole record is formatted first and written with a single
    /// call. The handle is opened per append; durability of the write is
    /// whatever the filesystem guarantees for a small append, unless
    /// `sync_index` is set.
    pub async fn append(&self, section: &[u8], name: &[u8], position: &Position) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4 + section.len() + 4 + name.len() + POSITION_SIZE);
        buf.put_i32_le(section.len() as i32);
        buf.put_slice(section);
        buf.put_i32_le(name.len() as i32);
        buf.put_slice(name);
        position.encode(&mut buf);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        if self.sync {
            file.sync_data().await?;
        }
        Ok(())
    }

    /// Replays the log from the start.
    ///
    /// Returns every record that was fully persisted, in append order.
    /// Parsing stops at end-of-file or at the first malformed or
    /// truncated record; the file is then cut back to the clean prefix so
    /// subsequent appends extend a replayable log. A read error before
    /// end-of-file is fatal and propagates to the caller.
    pub async fn replay(&self) -> Result<Vec<IndexRecord>> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no index log, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        let mut block = vec![0u8; BLOCK_SIZE];
        loop {
            let read = file.read(&mut block).await?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&block[..read]);
        }

        let mut records = Vec::new();
        let mut at = 0;
        while at < data.len() {
            match decode_record(&data, at) {
                Decoded::Record(record, consumed) => {
                    records.push(record);
                    at += consumed;
                }
                Decoded::Incomplete => {
                    warn!(
                        tail_bytes = data.len() - at,
                        "index log ends mid-record, discarding partial tail"
                    );
                    break;
                }
                Decoded::Malformed => {
                    warn!(at, "malformed index record, stopping replay");
                    break;
                }
            }
        }

        if at < data.len() {
            drop(file);
            let file = OpenOptions::new().write(true).open(&self.path).await?;
            file.set_len(at as u64).await?;
            file.sync_data().await?;
        }

        info!(
            path = %self.path.display(),
            records = records.len(),
            "index log replayed"
        );
        Ok(records)
    }
}
