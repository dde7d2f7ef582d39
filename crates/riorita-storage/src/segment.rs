//! Per-shard append-only segment files.
//!
//! Each shard owns the directory `{root}/{group}` holding segment files
//! named `riorita.0000`, `riorita.0001` and so on. Values are written
//! back to back as `bytes || fingerprint` with no per-record framing; the
//! index log carries the coordinates needed to read them back.
//!
//! A shard's write state is the pair `(index, offset)`: the number of the
//! current segment and the byte length written to it. When the next
//! record would push the segment past its capacity, the shard rolls to a
//! fresh segment. State starts at `(-1, capacity)` so the very first
//! append rolls to segment 0000 at offset 0.
//!
//! Reads re-verify the fingerprint against both the directory's copy and
//! the trailing four bytes on disk. A missing segment, a failed seek, a
//! short read or a mismatched fingerprint all surface as a corrupt-record
//! error; a stale index entry pointing into a segment that never reached
//! the disk must not crash the server.

use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::position::Position;
use bytes::{BufMut, BytesMut};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Formats a segment file name for the given index.
fn segment_name(index: i32) -> String {
    format!("riorita.{:04}", index)
}

/// Write state and I/O for one shard of the data-file set.
pub struct ShardFiles {
    dir: PathBuf,
    group: i32,
    capacity: i64,
    index: i32,
    offset: i64,
}

impl ShardFiles {
    pub fn new(root: &Path, group: i32, capacity: i64) -> Self {
        Self {
            dir: root.join(group.to_string()),
            group,
            capacity,
            index: -1,
            offset: capacity,
        }
    }

    pub fn group(&self) -> i32 {
        self.group
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Folds one replayed position into the shard's write state.
    ///
    /// Tombstones carry no physical location and are skipped. For real
    /// positions the write cursor lands just past the record, including
    /// its trailing fingerprint.
    pub fn observe(&mut self, pos: &Position) {
        if pos.is_tombstone() {
            return;
        }
        let end = i64::from(pos.offset) + i64::from(pos.length) + 4;
        if pos.index > self.index {
            self.index = pos.index;
            self.offset = end;
        } else if pos.index == self.index {
            self.offset = self.offset.max(end);
        }
    }

    fn segment_path(&self, index: i32) -> PathBuf {
        self.dir.join(segment_name(index))
    }

    /// Creates the next segment file, empty, and resets the write cursor.
    async fn roll(&mut self) -> Result<()> {
        self.index += 1;
        self.offset = 0;
        tokio::fs::create_dir_all(&self.dir).await?;
        let file = File::create(self.segment_path(self.index)).await?;
        drop(file);
        debug!(group = self.group, index = self.index, "segment rolled");
        Ok(())
    }

    /// Appends `value || fingerprint` to the current segment, rolling
    /// first when the record would not fit. Returns the position that was
    /// filled; its expiration is left at zero for the caller to set.
    pub async fn append(&mut self, value: &[u8], fp: i32) -> Result<Position> {
        let record_len = value.len() as i64 + 4;
        if self.offset + record_len >= self.capacity {
            self.roll().await?;
        }

        let mut buf = BytesMut::with_capacity(value.len() + 4);
        buf.put_slice(value);
        buf.put_i32_le(fp);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(self.index))
            .await?;
        file.write_all(&buf).await?;

        let pos = Position {
            group: self.group,
            index: self.index,
            offset: self.offset as i32,
            length: value.len() as i32,
            fingerprint: fp,
            expires_at: 0,
        };
        self.offset += record_len;
        Ok(pos)
    }

    /// Reads the value at `pos`, verifying its fingerprint twice: once
    /// against the position and once against the trailing bytes on disk.
    pub async fn read(&self, pos: &Position) -> Result<Vec<u8>> {
        let corrupt = |detail: &str| Error::CorruptRecord {
            group: pos.group,
            index: pos.index,
            offset: pos.offset,
            detail: detail.to_string(),
        };

        if pos.length < 0 || pos.offset < 0 || pos.index < 0 {
            return Err(corrupt("negative coordinates"));
        }

        let path = self.segment_path(pos.index);
        let mut file = File::open(&path)
            .await
            .map_err(|e| corrupt(&format!("open failed: {e}")))?;
        file.seek(SeekFrom::Start(pos.offset as u64))
            .await
            .map_err(|e| corrupt(&format!("seek failed: {e}")))?;

        let mut bytes = vec![0u8; pos.length as usize + 4];
        file.read_exact(&mut bytes)
            .await
            .map_err(|e| corrupt(&format!("short read: {e}")))?;

        let stored = i32::from_le_bytes([
            bytes[pos.length as usize],
            bytes[pos.length as usize + 1],
            bytes[pos.length as usize + 2],
            bytes[pos.length as usize + 3],
        ]);
        let computed = fingerprint(&bytes[..pos.length as usize]);
        if computed != pos.fingerprint || stored != pos.fingerprint {
            return Err(corrupt("fingerprint mismatch"));
        }

        bytes.truncate(pos.length as usize);
        Ok(bytes)
    }
}
