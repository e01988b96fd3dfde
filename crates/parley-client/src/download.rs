//! Incoming file downloads.
//!
//! A PUBLISH_FILE frame opens a download; FILE_DATA chunks are appended in
//! arrival order (which is file order, per the protocol's per-connection
//! ordering guarantee). The downloads directory is created on first use and
//! existing files are overwritten.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use parley_core::FileMeta;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub(crate) struct Downloads {
    dir: PathBuf,
    active: HashMap<u32, Download>,
}

struct Download {
    sender: String,
    filename: String,
    size: u32,
    received: u32,
    file: File,
    path: PathBuf,
}

/// Returned when a download reaches its declared size.
pub(crate) struct FinishedFile {
    pub sender: String,
    pub filename: String,
    pub size: u32,
    pub path: PathBuf,
}

impl Downloads {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            active: HashMap::new(),
        }
    }

    /// Open a download for an announced file. A zero-length file is complete
    /// immediately, since no chunks will follow.
    pub async fn start(
        &mut self,
        message_id: u32,
        sender: String,
        meta: FileMeta,
    ) -> io::Result<Option<FinishedFile>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&meta.filename);
        let file = File::create(&path).await?;

        let download = Download {
            sender,
            filename: meta.filename,
            size: meta.size,
            received: 0,
            file,
            path,
        };

        if download.size == 0 {
            return Ok(Some(finish(download)));
        }
        self.active.insert(message_id, download);
        Ok(None)
    }

    /// Append a chunk. Unknown ids are dropped with a warning — the
    /// announcement was never seen, so there is nowhere to write.
    pub async fn chunk(&mut self, message_id: u32, data: &[u8]) -> io::Result<Option<FinishedFile>> {
        let Some(mut download) = self.active.remove(&message_id) else {
            tracing::warn!(message_id, "chunk for unknown download, dropping");
            return Ok(None);
        };

        download.file.write_all(data).await?;
        download.received = download.received.saturating_add(data.len() as u32);

        if download.received >= download.size {
            download.file.flush().await?;
            return Ok(Some(finish(download)));
        }
        self.active.insert(message_id, download);
        Ok(None)
    }
}

fn finish(download: Download) -> FinishedFile {
    FinishedFile {
        sender: download.sender,
        filename: download.filename,
        size: download.size,
        path: download.path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "parley-client-dl-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn chunks_assemble_in_order() {
        let dir = scratch("order");
        let mut downloads = Downloads::new(dir.clone());

        let meta = FileMeta {
            filename: "notes.txt".into(),
            size: 10,
        };
        assert!(downloads.start(42, "alice".into(), meta).await.unwrap().is_none());

        assert!(downloads.chunk(42, b"012345").await.unwrap().is_none());
        let done = downloads.chunk(42, b"6789").await.unwrap().unwrap();

        assert_eq!(done.filename, "notes.txt");
        assert_eq!(done.sender, "alice");
        assert_eq!(done.size, 10);
        assert_eq!(std::fs::read(&done.path).unwrap(), b"0123456789");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn zero_length_file_completes_at_announcement() {
        let dir = scratch("empty");
        let mut downloads = Downloads::new(dir.clone());

        let meta = FileMeta {
            filename: "empty.bin".into(),
            size: 0,
        };
        let done = downloads.start(1, "bob".into(), meta).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&done.path).unwrap(), b"");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unknown_chunk_is_dropped() {
        let dir = scratch("unknown");
        let mut downloads = Downloads::new(dir.clone());

        assert!(downloads.chunk(99, b"data").await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn existing_file_is_overwritten() {
        let dir = scratch("overwrite");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"old contents that are longer").unwrap();

        let mut downloads = Downloads::new(dir.clone());
        let meta = FileMeta {
            filename: "a.txt".into(),
            size: 3,
        };
        downloads.start(7, "alice".into(), meta).await.unwrap();
        let done = downloads.chunk(7, b"new").await.unwrap().unwrap();
        assert_eq!(std::fs::read(&done.path).unwrap(), b"new");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
