//! The storage front: one operation set over the concrete backends.
//!
//! [`Storage`] is a sum of the backends rather than a trait object, so
//! the full set of variants is visible at the dispatch site and the
//! compact engine's extra surface (section erase, close-and-wipe) stays a
//! first-class part of the interface.

use crate::compact::CompactStorage;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::files::FilesStorage;
use crate::memory::MemoryStorage;
use std::fmt;
use std::str::FromStr;

/// Backend selector, as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Compact,
    Files,
    Memory,
    LevelDb,
    RocksDb,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "compact" => Ok(BackendKind::Compact),
            "files" => Ok(BackendKind::Files),
            "memory" => Ok(BackendKind::Memory),
            "leveldb" => Ok(BackendKind::LevelDb),
            "rocksdb" => Ok(BackendKind::RocksDb),
            other => Err(Error::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Compact => "compact",
            BackendKind::Files => "files",
            BackendKind::Memory => "memory",
            BackendKind::LevelDb => "leveldb",
            BackendKind::RocksDb => "rocksdb",
        };
        f.write_str(name)
    }
}

/// A concrete storage backend.
pub enum Storage {
    Compact(CompactStorage),
    Files(FilesStorage),
    Memory(MemoryStorage),
}

impl Storage {
    /// Constructs the selected backend.
    ///
    /// `leveldb` and `rocksdb` are recognised names kept for command-line
    /// compatibility; this build does not ship them.
    pub async fn open(kind: BackendKind, config: StorageConfig) -> Result<Storage> {
        match kind {
            BackendKind::Compact => Ok(Storage::Compact(CompactStorage::open(config).await?)),
            BackendKind::Files => Ok(Storage::Files(FilesStorage::open(config.root).await?)),
            BackendKind::Memory => Ok(Storage::Memory(MemoryStorage::new())),
            BackendKind::LevelDb | BackendKind::RocksDb => {
                Err(Error::UnsupportedBackend(kind.to_string()))
            }
        }
    }

    pub async fn has(&self, section: &[u8], name: &[u8], now: i64) -> bool {
        match self {
            Storage::Compact(s) => s.has(section, name, now).await,
            Storage::Files(s) => s.has(section, name).await,
            Storage::Memory(s) => s.has(section, name, now),
        }
    }

    pub async fn get(&self, section: &[u8], name: &[u8], now: i64) -> Result<Option<Vec<u8>>> {
        match self {
            Storage::Compact(s) => s.get(section, name, now).await,
            Storage::Files(s) => Ok(s.get(section, name).await),
            Storage::Memory(s) => Ok(s.get(section, name, now)),
        }
    }

    pub async fn put(
        &self,
        section: &[u8],
        name: &[u8],
        value: &[u8],
        now: i64,
        lifetime: i64,
        overwrite: bool,
    ) -> Result<bool> {
        match self {
            Storage::Compact(s) => s.put(section, name, value, now, lifetime, overwrite).await,
            Storage::Files(s) => s.put(section, name, value, overwrite).await,
            Storage::Memory(s) => Ok(s.put(section, name, value, now, lifetime, overwrite)),
        }
    }

    pub async fn erase(&self, section: &[u8], name: &[u8], now: i64) -> Result<bool> {
        match self {
            Storage::Compact(s) => s.erase(section, name, now).await,
            Storage::Files(s) => Ok(s.erase(section, name).await),
            Storage::Memory(s) => Ok(s.erase(section, name, now)),
        }
    }

    pub async fn erase_section(&self, section: &[u8]) -> Result<()> {
        match self {
            Storage::Compact(s) => s.erase_section(section).await,
            Storage::Files(s) => s.erase_section(section).await,
            Storage::Memory(s) => {
                s.erase_section(section);
                Ok(())
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            Storage::Compact(s) => s.close().await,
            Storage::Files(s) => s.close().await,
            Storage::Memory(s) => {
                s.close();
                Ok(())
            }
        }
    }
}
