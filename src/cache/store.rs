//! Filesystem storage for page payloads.
//!
//! Layout: `<cache_dir>/<sanitized channel>/page-<N>.dat`, one file per page
//! that actually has data. Known-empty pages exist only in the index and
//! have no file here.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Reads and writes page payload files under per-channel directories.
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    /// Creates a store rooted at `dir`. The directory itself is created
    /// lazily on first write.
    pub fn new(dir: &Path) -> Self {
        Self {
            root: dir.to_path_buf(),
        }
    }

    /// Deterministic path for a page file.
    pub fn path_for(&self, channel: &str, page: u64) -> PathBuf {
        self.root
            .join(sanitize(channel))
            .join(format!("page-{page}.dat"))
    }

    /// Writes `payload` to the page file, overwriting if present. The file
    /// is synced before returning so the index row recorded afterwards
    /// never points at data that is not yet durable.
    pub fn write(&self, channel: &str, page: u64, payload: &[u8]) -> Result<()> {
        let path = self.path_for(channel, page);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(payload)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads the page file, or `None` if it does not exist. A missing file
    /// is a soft condition here: the caller decides whether it is a plain
    /// miss or an index inconsistency worth logging.
    pub fn read(&self, channel: &str, page: u64) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(channel, page)) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the given page files, then tries to remove the channel
    /// directory if it is now empty. Both steps are best effort: missing
    /// files are skipped, and a non-empty directory is an expected race
    /// with a concurrent writer.
    pub fn delete(&self, channel: &str, pages: &[u64]) -> Result<()> {
        for page in pages {
            let path = self.path_for(channel, *page);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        let dir = self.root.join(sanitize(channel));
        if let Err(e) = fs::remove_dir(&dir) {
            if e.kind() != ErrorKind::NotFound {
                debug!(channel, error = %e, "cache.store.channel_dir_kept");
            }
        }
        Ok(())
    }

    /// Sum of the file sizes of every stored page: the precise footprint of
    /// the payload side, as opposed to the index's cheap estimate.
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0;
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                // The index database and its sidecars live at the root.
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let meta = file.metadata()?;
                if meta.is_file() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

/// Maps a channel id to a filesystem-safe directory name: every character
/// outside `[A-Za-z0-9_]` becomes `_`.
pub(crate) fn sanitize(channel: &str) -> String {
    channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separator_characters() {
        assert_eq!(sanitize("H1:GDS-CHANNEL_NAME.mean"), "H1_GDS_CHANNEL_NAME_mean");
        assert_eq!(sanitize("plain123"), "plain123");
    }

    #[test]
    fn write_read_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(dir.path());
        store.write("chan:a", 3, b"abc").expect("write");
        let payload = store.read("chan:a", 3).expect("read");
        assert_eq!(payload.as_deref(), Some(&b"abc"[..]));
        assert!(store.read("chan:a", 4).expect("read missing").is_none());
    }

    #[test]
    fn delete_removes_files_and_empty_channel_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(dir.path());
        store.write("chan1", 0, b"x").expect("write");
        store.write("chan1", 1, b"y").expect("write");
        store.delete("chan1", &[0, 1]).expect("delete");
        assert!(!dir.path().join("chan1").exists());
        // Deleting pages that are already gone is not an error.
        store.delete("chan1", &[0]).expect("re-delete");
    }

    #[test]
    fn delete_keeps_non_empty_channel_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(dir.path());
        store.write("chan1", 0, b"x").expect("write");
        store.write("chan1", 1, b"y").expect("write");
        store.delete("chan1", &[0]).expect("delete");
        assert!(dir.path().join("chan1").exists());
        assert!(store.read("chan1", 1).expect("read").is_some());
    }

    #[test]
    fn total_bytes_sums_page_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(dir.path());
        store.write("chan1", 0, &[0u8; 100]).expect("write");
        store.write("chan2", 0, &[0u8; 50]).expect("write");
        // A root-level file (like the index db) is not counted.
        std::fs::write(dir.path().join("index.db"), [0u8; 999]).expect("write index");
        assert_eq!(store.total_bytes().expect("total"), 150);
    }

    #[test]
    fn total_bytes_of_missing_root_is_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(&dir.path().join("nope"));
        assert_eq!(store.total_bytes().expect("total"), 0);
    }
}
