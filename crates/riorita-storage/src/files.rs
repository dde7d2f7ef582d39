//! One-file-per-key backend.
//!
//! Every value is a plain file at `{root}/{section}/{name}.bin`. Simple
//! and debuggable, at the cost of one inode per key and no lifetime
//! support: existence is liveness. The uniform `Storage` surface still
//! takes timestamps; its dispatch discards them before calling in here,
//! so the operations below have no clock parameters at all.

use crate::error::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub struct FilesStorage {
    root: PathBuf,
    closed: AtomicBool,
}

impl FilesStorage {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "files storage opened");
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
        })
    }

    fn file_path(&self, section: &[u8], name: &[u8]) -> PathBuf {
        let section = String::from_utf8_lossy(section);
        let name = String::from_utf8_lossy(name);
        self.root
            .join(section.as_ref())
            .join(format!("{}.bin", name))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn has(&self, section: &[u8], name: &[u8]) -> bool {
        !self.is_closed()
            && tokio::fs::try_exists(self.file_path(section, name))
                .await
                .unwrap_or(false)
    }

    pub async fn get(&self, section: &[u8], name: &[u8]) -> Option<Vec<u8>> {
        if self.is_closed() {
            return None;
        }
        tokio::fs::read(self.file_path(section, name)).await.ok()
    }

    pub async fn put(
        &self,
        section: &[u8],
        name: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let path = self.file_path(section, name);
        if !overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, value).await?;
        Ok(true)
    }

    pub async fn erase(&self, section: &[u8], name: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::fs::remove_file(self.file_path(section, name))
            .await
            .is_ok()
    }

    pub async fn erase_section(&self, section: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let dir = self.root.join(String::from_utf8_lossy(section).as_ref());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        info!(root = %self.root.display(), "files storage closed");
        Ok(())
    }
}
