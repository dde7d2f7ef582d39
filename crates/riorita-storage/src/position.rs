//! The on-disk location record for one stored value.
//!
//! A `Position` pins a value to a shard, a segment file within that
//! shard, a byte offset, and a length, together with the value's
//! fingerprint and an absolute expiration time. Positions are written to
//! the index log as fixed 32-byte records and kept in the in-memory
//! directory.
//!
//! ## Layout (32 bytes, little-endian)
//!
//! ```text
//! ┌───────┬───────┬────────┬────────┬─────────────┬──────────┬────────────┐
//! │ group │ index │ offset │ length │ fingerprint │ reserved │ expires_at │
//! │  i32  │  i32  │  i32   │  i32   │     i32     │ 4 bytes  │    i64     │
//! └───────┴───────┴────────┴────────┴─────────────┴──────────┴────────────┘
//! ```
//!
//! The four reserved bytes are written as zero and ignored on read; they
//! keep the record at 32 bytes, the size used by existing index files.
//! Fields are serialized one by one, never by dumping a struct, so the
//! format does not depend on compiler layout.

use bytes::{Buf, BufMut};

/// Size of an encoded `Position` in bytes.
pub const POSITION_SIZE: usize = 32;

/// Location of one stored value inside the data-file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Shard index, `0 <= group < groups`.
    pub group: i32,
    /// Segment file number within the shard.
    pub index: i32,
    /// Byte offset of the value within the segment.
    pub offset: i32,
    /// Byte length of the value, excluding the trailing fingerprint.
    pub length: i32,
    /// Rolling fingerprint of the value bytes.
    pub fingerprint: i32,
    /// Absolute expiration time in milliseconds.
    pub expires_at: i64,
}

impl Position {
    /// Sentinel marking a logically deleted key.
    ///
    /// No real append produces this tuple: a value written at the very
    /// start of shard 0 would either have `length > 0` or, for the empty
    /// value, fingerprint 0.
    pub const TOMBSTONE: Position = Position {
        group: 0,
        index: 0,
        offset: 0,
        length: 0,
        fingerprint: 1,
        expires_at: 0,
    };

    pub fn is_tombstone(&self) -> bool {
        self.group == 0
            && self.index == 0
            && self.offset == 0
            && self.length == 0
            && self.fingerprint == 1
    }

    /// True when the entry may be served: neither erased nor expired.
    pub fn is_live(&self, now: i64) -> bool {
        !self.is_tombstone() && self.expires_at > now
    }

    /// Appends the 32-byte encoding to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.group);
        buf.put_i32_le(self.index);
        buf.put_i32_le(self.offset);
        buf.put_i32_le(self.length);
        buf.put_i32_le(self.fingerprint);
        buf.put_bytes(0, 4);
        buf.put_i64_le(self.expires_at);
    }

    /// Reads a `Position` from `buf`, which must hold at least
    /// [`POSITION_SIZE`] bytes.
    pub fn decode<B: Buf>(buf: &mut B) -> Position {
        let group = buf.get_i32_le();
        let index = buf.get_i32_le();
        let offset = buf.get_i32_le();
        let length = buf.get_i32_le();
        let fingerprint = buf.get_i32_le();
        buf.advance(4);
        let expires_at = buf.get_i64_le();
        Position {
            group,
            index,
            offset,
            length,
            fingerprint,
            expires_at,
        }
    }
}
