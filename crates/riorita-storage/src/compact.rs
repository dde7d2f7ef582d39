//! The compact append-only storage engine.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//!   riorita.index                  index log (recovery source of truth)
//!   0/riorita.0000 riorita.0001 …  shard 0 segments
//!   1/riorita.0000 …               shard 1 segments
//!   …
//! ```
//!
//! Keys are `(section, name)` pairs; sections group names for bulk erase.
//! Values live in per-shard segment files, located through an in-memory
//! directory mapping `(section, name)` to a [`Position`]. The directory
//! is rebuilt at open by replaying the index log; data files are never
//! scanned.
//!
//! ## Write path
//!
//! A put hashes the key to a shard, appends `value || fingerprint` to the
//! shard's current segment (rolling to a new segment when full), then
//! updates the directory and appends the `(section, name, position)`
//! record to the index log. Deletion is logical: an erase writes the
//! tombstone position through the same path and leaves the data bytes in
//! place. Space is reclaimed only by [`CompactStorage::close`], which
//! wipes the root.
//!
//! ## Concurrency
//!
//! Two levels of locking:
//!
//! - one directory lock guarding the key map, the closed flag and the
//!   index log writer;
//! - one lock per shard guarding that shard's segment I/O and write
//!   cursor.
//!
//! The order is always shard lock before directory lock. A get copies the
//! position under the directory lock, releases it, and only then takes
//! the shard lock for the disk read, so it never holds both.
//!
//! ## Crash behavior
//!
//! The index record is appended after the data bytes, so a replayed
//! position always refers to data that was written, except when the
//! process died between the two appends; then the update is simply lost
//! and the data bytes are orphaned. A torn index tail is discarded at
//! replay. Reads verify fingerprints, so a stale position that outlived
//! its segment surfaces as a corrupt-record error rather than garbage.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::index_log::IndexLog;
use crate::position::Position;
use crate::segment::ShardFiles;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Selects the shard for a key.
///
/// Two multiplicative hashes with coprime moduli are composed, one over
/// the section and one over the name, so that a single differing byte in
/// either component spreads keys across shards. Independent of the value
/// fingerprint. Deterministic: the same key always lands on the same
/// shard for a given shard count.
pub fn shard_of(section: &[u8], name: &[u8], groups: usize) -> usize {
    let mut h: i32 = 0;
    for &b in section {
        h = (h * 113 + (i32::from(b as i8) + 255)) % 1_061_599;
    }
    for &b in name {
        h = (h * 1009 + (i32::from(b as i8) + 255)) % 1_062_599;
    }
    h as usize % groups
}

type SectionMap = BTreeMap<Bytes, BTreeMap<Bytes, Position>>;

struct Directory {
    positions: SectionMap,
    closed: bool,
}

impl Directory {
    fn lookup(&self, section: &[u8], name: &[u8]) -> Option<Position> {
        self.positions.get(section)?.get(name).copied()
    }

    fn live(&self, section: &[u8], name: &[u8], now: i64) -> bool {
        self.lookup(section, name)
            .map(|pos| pos.is_live(now))
            .unwrap_or(false)
    }

    fn insert(&mut self, section: &[u8], name: &[u8], pos: Position) {
        self.positions
            .entry(Bytes::copy_from_slice(section))
            .or_default()
            .insert(Bytes::copy_from_slice(name), pos);
    }
}

/// Sharded, crash-tolerant key-value store over append-only files.
pub struct CompactStorage {
    config: StorageConfig,
    index_log: IndexLog,
    directory: Mutex<Directory>,
    shards: Vec<Mutex<ShardFiles>>,
}

impl CompactStorage {
    /// Opens the store, creating the root directory when absent and
    /// replaying the index log to rebuild the directory and the per-shard
    /// write cursors.
    pub async fn open(config: StorageConfig) -> Result<Self> {
        assert!(config.groups > 0, "shard count must be positive");
        tokio::fs::create_dir_all(&config.root).await?;

        let index_log = IndexLog::new(&config.root, config.sync_index);
        let mut shards: Vec<ShardFiles> = (0..config.groups)
            .map(|g| ShardFiles::new(&config.root, g as i32, config.segment_max_bytes))
            .collect();

        let mut directory = Directory {
            positions: SectionMap::new(),
            closed: false,
        };

        let records = index_log.replay().await?;
        let mut applied = 0usize;
        for record in records {
            let group = record.position.group;
            if group < 0 || group as usize >= config.groups {
                warn!(
                    group,
                    groups = config.groups,
                    "index record for unknown shard, stopping replay"
                );
                break;
            }
            directory.insert(&record.section, &record.name, record.position);
            shards[group as usize].observe(&record.position);
            applied += 1;
        }

        info!(
            root = %config.root.display(),
            groups = config.groups,
            records = applied,
            "compact storage opened"
        );

        Ok(Self {
            config,
            index_log,
            directory: Mutex::new(directory),
            shards: shards.into_iter().map(Mutex::new).collect(),
        })
    }

    pub fn groups(&self) -> usize {
        self.config.groups
    }

    /// True iff a live (neither erased nor expired) entry exists.
    pub async fn has(&self, section: &[u8], name: &[u8], now: i64) -> bool {
        let dir = self.directory.lock().await;
        !dir.closed && dir.live(section, name, now)
    }

    /// Returns the stored value, or `None` for a missing, erased or
    /// expired entry. A fingerprint mismatch or failed segment read is an
    /// error; the engine stays open and unrelated reads may still
    /// succeed.
    pub async fn get(&self, section: &[u8], name: &[u8], now: i64) -> Result<Option<Vec<u8>>> {
        let pos = {
            let dir = self.directory.lock().await;
            if dir.closed {
                return Ok(None);
            }
            match dir.lookup(section, name) {
                Some(pos) => pos,
                None => return Ok(None),
            }
        };

        if !pos.is_live(now) {
            return Ok(None);
        }

        let shard = self.shards[pos.group as usize].lock().await;
        let bytes = shard.read(&pos).await?;
        Ok(Some(bytes))
    }

    /// Stores a value under `(section, name)` with the given lifetime.
    ///
    /// Returns `false` without writing when the engine is closed, or when
    /// `overwrite` is false and a live entry already exists.
    pub async fn put(
        &self,
        section: &[u8],
        name: &[u8],
        value: &[u8],
        now: i64,
        lifetime: i64,
        overwrite: bool,
    ) -> Result<bool> {
        let group = shard_of(section, name, self.config.groups);
        let mut shard = self.shards[group].lock().await;

        {
            let dir = self.directory.lock().await;
            if dir.closed {
                return Ok(false);
            }
            if !overwrite && dir.live(section, name, now) {
                return Ok(false);
            }
        }

        let fp = crate::fingerprint::fingerprint(value);
        let mut pos = shard.append(value, fp).await?;
        pos.expires_at = now.saturating_add(lifetime);

        let mut dir = self.directory.lock().await;
        if dir.closed {
            // Closed while the data append was in flight; the bytes are
            // orphaned and the update is not recorded.
            return Ok(false);
        }
        dir.insert(section, name, pos);
        self.index_log.append(section, name, &pos).await?;
        Ok(true)
    }

    /// Logically deletes one entry. Returns `true` iff a live entry was
    /// tombstoned.
    pub async fn erase(&self, section: &[u8], name: &[u8], now: i64) -> Result<bool> {
        let mut dir = self.directory.lock().await;
        if dir.closed || !dir.live(section, name, now) {
            return Ok(false);
        }
        dir.insert(section, name, Position::TOMBSTONE);
        self.index_log
            .append(section, name, &Position::TOMBSTONE)
            .await?;
        Ok(true)
    }

    /// Logically deletes every entry in a section that is not already a
    /// tombstone. Holds only the directory lock, so it is not atomic
    /// against concurrent puts into the same section.
    pub async fn erase_section(&self, section: &[u8]) -> Result<()> {
        let mut dir = self.directory.lock().await;
        if dir.closed {
            return Ok(());
        }
        let Some(names) = dir.positions.get_mut(section) else {
            return Ok(());
        };
        let mut erased: Vec<Bytes> = Vec::new();
        for (name, pos) in names.iter_mut() {
            if !pos.is_tombstone() {
                *pos = Position::TOMBSTONE;
                erased.push(name.clone());
            }
        }
        for name in &erased {
            self.index_log
                .append(section, name, &Position::TOMBSTONE)
                .await?;
        }
        Ok(())
    }

    /// Marks the engine closed and removes everything beneath the root.
    /// All later operations are no-ops. Close is one-way and idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut dir = self.directory.lock().await;
        if dir.closed {
            return Ok(());
        }
        dir.closed = true;
        dir.positions.clear();

        let mut entries = tokio::fs::read_dir(&self.config.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        info!(root = %self.config.root.display(), "compact storage closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIFETIME: i64 = 1_000_000_000;

    fn config(dir: &TempDir) -> StorageConfig {
        StorageConfig::new(dir.path())
    }

    #[tokio::test]
    async fn put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();

        let value = [0xDEu8, 0xAD, 0xBE, 0xEF];
        assert!(store
            .put(b"s", b"k", &value, 0, LIFETIME, true)
            .await
            .unwrap());
        assert_eq!(store.get(b"s", b"k", 1).await.unwrap().unwrap(), value);
        assert!(store.has(b"s", b"k", 1).await);
    }

    #[tokio::test]
    async fn reads_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();
        store.put(b"s", b"k", b"stable", 0, LIFETIME, true).await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                store.get(b"s", b"k", 1).await.unwrap().unwrap(),
                b"stable"
            );
        }
    }

    #[tokio::test]
    async fn overwrite_denied_keeps_first_value() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();

        assert!(store.put(b"s", b"k", b"a", 0, LIFETIME, false).await.unwrap());
        assert!(!store.put(b"s", b"k", b"b", 0, LIFETIME, false).await.unwrap());
        assert_eq!(store.get(b"s", b"k", 1).await.unwrap().unwrap(), b"a");
    }

    #[tokio::test]
    async fn overwrite_allowed_replaces_value() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();

        store.put(b"s", b"k", b"a", 0, LIFETIME, true).await.unwrap();
        assert!(store.put(b"s", b"k", b"b", 0, LIFETIME, true).await.unwrap());
        assert_eq!(store.get(b"s", b"k", 1).await.unwrap().unwrap(), b"b");
    }

    #[tokio::test]
    async fn erase_then_reput() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();

        store.put(b"s", b"k", b"v", 0, LIFETIME, true).await.unwrap();
        assert!(store.erase(b"s", b"k", 1).await.unwrap());
        assert!(!store.has(b"s", b"k", 1).await);
        assert!(store.get(b"s", b"k", 1).await.unwrap().is_none());

        // A second erase finds nothing live.
        assert!(!store.erase(b"s", b"k", 1).await.unwrap());

        // The tombstone does not block a non-overwriting put.
        assert!(store.put(b"s", b"k", b"c", 2, LIFETIME, false).await.unwrap());
        assert_eq!(store.get(b"s", b"k", 3).await.unwrap().unwrap(), b"c");
    }

    #[tokio::test]
    async fn expiration_hides_entry() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();

        let now = 1_000;
        store.put(b"s", b"k", b"x", now, 100, true).await.unwrap();
        assert!(store.has(b"s", b"k", now + 99).await);
        assert!(!store.has(b"s", b"k", now + 101).await);
        assert!(store.get(b"s", b"k", now + 101).await.unwrap().is_none());

        // An expired entry does not block overwrite=false.
        assert!(store
            .put(b"s", b"k", b"x2", now + 101, 100, false)
            .await
            .unwrap());
        assert!(store.has(b"s", b"k", now + 102).await);
    }

    #[tokio::test]
    async fn segment_rollover_keeps_all_values_readable() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.groups = 1;
        cfg.segment_max_bytes = 4096;
        let store = CompactStorage::open(cfg).await.unwrap();

        let value = vec![9u8; 1000];
        for i in 0..5u8 {
            assert!(store
                .put(b"s", &[b'k', i], &value, 0, LIFETIME, true)
                .await
                .unwrap());
        }

        assert!(dir.path().join("0").join("riorita.0000").exists());
        assert!(dir.path().join("0").join("riorita.0001").exists());
        for i in 0..5u8 {
            assert_eq!(
                store.get(b"s", &[b'k', i], 1).await.unwrap().unwrap(),
                value
            );
        }
    }

    #[tokio::test]
    async fn reopen_recovers_directory_and_cursors() {
        let dir = TempDir::new().unwrap();
        {
            let store = CompactStorage::open(config(&dir)).await.unwrap();
            store.put(b"a", b"one", b"1111", 0, LIFETIME, true).await.unwrap();
            store.put(b"a", b"two", b"22", 0, LIFETIME, true).await.unwrap();
            store.put(b"b", b"three", b"333", 0, LIFETIME, true).await.unwrap();
            store.erase(b"a", b"two", 1).await.unwrap();
        }

        let store = CompactStorage::open(config(&dir)).await.unwrap();
        assert_eq!(store.get(b"a", b"one", 2).await.unwrap().unwrap(), b"1111");
        assert!(store.get(b"a", b"two", 2).await.unwrap().is_none());
        assert_eq!(store.get(b"b", b"three", 2).await.unwrap().unwrap(), b"333");

        // New writes extend the recovered cursors without clobbering.
        store.put(b"a", b"four", b"4", 3, LIFETIME, true).await.unwrap();
        assert_eq!(store.get(b"a", b"one", 4).await.unwrap().unwrap(), b"1111");
        assert_eq!(store.get(b"a", b"four", 4).await.unwrap().unwrap(), b"4");
    }

    #[tokio::test]
    async fn recovery_after_torn_index_tail() {
        let dir = TempDir::new().unwrap();
        {
            let store = CompactStorage::open(config(&dir)).await.unwrap();
            store
                .put(b"s", b"k", &[0xDE, 0xAD, 0xBE, 0xEF], 0, LIFETIME, true)
                .await
                .unwrap();
        }

        let index_path = dir.path().join("riorita.index");
        let len = std::fs::metadata(&index_path).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&index_path)
            .unwrap();
        file.set_len(len - 3).unwrap();

        let store = CompactStorage::open(config(&dir)).await.unwrap();
        assert!(!store.has(b"s", b"k", 1).await);
        assert!(store.put(b"s", b"k", b"y", 1, LIFETIME, false).await.unwrap());
        assert_eq!(store.get(b"s", b"k", 2).await.unwrap().unwrap(), b"y");
    }

    #[tokio::test]
    async fn close_makes_operations_noops_and_wipes_root() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();
        store.put(b"s", b"k", b"v", 0, LIFETIME, true).await.unwrap();

        store.close().await.unwrap();
        assert!(store.get(b"s", b"k", 1).await.unwrap().is_none());
        assert!(!store.has(b"s", b"k", 1).await);
        assert!(!store.put(b"s", b"k2", b"v", 1, LIFETIME, true).await.unwrap());
        assert!(!store.erase(b"s", b"k", 1).await.unwrap());

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(remaining.is_empty());

        // Idempotent.
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn erase_section_hides_every_name() {
        let dir = TempDir::new().unwrap();
        let store = CompactStorage::open(config(&dir)).await.unwrap();

        store.put(b"sec", b"a", b"1", 0, LIFETIME, true).await.unwrap();
        store.put(b"sec", b"b", b"2", 0, LIFETIME, true).await.unwrap();
        store.put(b"other", b"a", b"3", 0, LIFETIME, true).await.unwrap();

        store.erase_section(b"sec").await.unwrap();
        assert!(!store.has(b"sec", b"a", 1).await);
        assert!(!store.has(b"sec", b"b", 1).await);
        assert!(store.has(b"other", b"a", 1).await);

        // Tombstones survive a reopen.
        drop(store);
        let store = CompactStorage::open(config(&dir)).await.unwrap();
        assert!(!store.has(b"sec", b"a", 1).await);
        assert!(store.has(b"other", b"a", 1).await);
    }

    #[tokio::test]
    async fn corrupt_segment_surfaces_as_error_not_panic() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.groups = 1;
        let store = CompactStorage::open(cfg).await.unwrap();
        store
            .put(b"s", b"k", b"precious bytes", 0, LIFETIME, true)
            .await
            .unwrap();

        let seg = dir.path().join("0").join("riorita.0000");
        let mut raw = std::fs::read(&seg).unwrap();
        raw[0] ^= 0xFF;
        std::fs::write(&seg, &raw).unwrap();

        assert!(store.get(b"s", b"k", 1).await.is_err());

        // Unrelated keys still read fine.
        store.put(b"s", b"k2", b"other", 1, LIFETIME, true).await.unwrap();
        assert_eq!(store.get(b"s", b"k2", 2).await.unwrap().unwrap(), b"other");
    }

    #[test]
    fn shard_selection_is_deterministic() {
        assert_eq!(shard_of(b"s", b"k", 8), shard_of(b"s", b"k", 8));
        // Values pinned so that an accidental change to the hash shows up.
        assert_eq!(shard_of(b"", b"", 8), 0);
        assert_eq!(shard_of(b"s", b"k", 1), 0);

        // Single-byte differences in either component move the key.
        let spread: std::collections::HashSet<usize> = (0..64u8)
            .map(|i| shard_of(b"section", &[b'k', i], 8))
            .collect();
        assert!(spread.len() > 1);
    }
}
