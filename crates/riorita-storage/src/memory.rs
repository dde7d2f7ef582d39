//! Pure in-memory backend.
//!
//! Keeps `(value, expires_at)` pairs in a nested map. Nothing survives a
//! restart; useful for tests and for serving as a plain cache server.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    sections: BTreeMap<Bytes, BTreeMap<Bytes, (Bytes, i64)>>,
    closed: bool,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, section: &[u8], name: &[u8], now: i64) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.closed
            && inner
                .sections
                .get(section)
                .and_then(|names| names.get(name))
                .map(|(_, expires_at)| *expires_at > now)
                .unwrap_or(false)
    }

    pub fn get(&self, section: &[u8], name: &[u8], now: i64) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return None;
        }
        inner
            .sections
            .get(section)
            .and_then(|names| names.get(name))
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.to_vec())
    }

    pub fn put(
        &self,
        section: &[u8],
        name: &[u8],
        value: &[u8],
        now: i64,
        lifetime: i64,
        overwrite: bool,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return false;
        }
        let live = inner
            .sections
            .get(section)
            .and_then(|names| names.get(name))
            .map(|(_, expires_at)| *expires_at > now)
            .unwrap_or(false);
        if !overwrite && live {
            return false;
        }
        inner
            .sections
            .entry(Bytes::copy_from_slice(section))
            .or_default()
            .insert(
                Bytes::copy_from_slice(name),
                (Bytes::copy_from_slice(value), now.saturating_add(lifetime)),
            );
        true
    }

    pub fn erase(&self, section: &[u8], name: &[u8], now: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return false;
        }
        match inner.sections.get_mut(section) {
            Some(names) => match names.remove(name) {
                Some((_, expires_at)) => expires_at > now,
                None => false,
            },
            None => false,
        }
    }

    pub fn erase_section(&self, section: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.closed {
            inner.sections.remove(section);
        }
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.sections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_roundtrip_and_expiry() {
        let store = MemoryStorage::new();
        assert!(store.put(b"s", b"k", b"v", 0, 100, true));
        assert_eq!(store.get(b"s", b"k", 50).unwrap(), b"v");
        assert!(store.get(b"s", b"k", 100).is_none());
        assert!(!store.has(b"s", b"k", 100));
    }

    #[test]
    fn overwrite_flag() {
        let store = MemoryStorage::new();
        assert!(store.put(b"s", b"k", b"a", 0, 100, false));
        assert!(!store.put(b"s", b"k", b"b", 0, 100, false));
        assert_eq!(store.get(b"s", b"k", 1).unwrap(), b"a");
    }

    #[test]
    fn erase_and_close() {
        let store = MemoryStorage::new();
        store.put(b"s", b"k", b"v", 0, 100, true);
        assert!(store.erase(b"s", b"k", 1));
        assert!(!store.erase(b"s", b"k", 1));

        store.put(b"s", b"k", b"v", 0, 100, true);
        store.close();
        assert!(store.get(b"s", b"k", 1).is_none());
        assert!(!store.put(b"s", b"k", b"v", 0, 100, true));
    }
}
