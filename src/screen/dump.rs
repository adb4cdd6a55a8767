//! Optional on-disk copy of every frame sent to the session.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::source::FrameSource;
use super::{FramePayload, JPEG_EXTENSION};
use crate::error::{StreamError, StreamResult};

/// Wraps a source and writes each payload's JPEG bytes to
/// `<dir>/<nanosecond timestamp>.jpg` before passing it on.
///
/// Write failures are logged and otherwise ignored; the payload still
/// goes downstream.
pub struct FrameDump {
    inner: Box<dyn FrameSource>,
    dir: PathBuf,
    last_stamp: i64,
}

impl FrameDump {
    pub fn new(inner: Box<dyn FrameSource>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
            last_stamp: 0,
        }
    }

    /// Wall-clock nanoseconds, bumped when needed so names never repeat.
    fn next_stamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }

    async fn write(&mut self, payload: &FramePayload) {
        let stamp = self.next_stamp();
        let path = self.dir.join(format!("{stamp:020}.{JPEG_EXTENSION}"));

        let bytes = match payload.decoded() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "payload is not valid base64; frame not dumped");
                return;
            }
        };
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => debug!(path = %path.display(), bytes = bytes.len(), "frame dumped"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to dump frame"),
        }
    }
}

#[async_trait]
impl FrameSource for FrameDump {
    async fn open(&mut self) -> StreamResult<()> {
        if !tokio::fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(StreamError::DumpDirMissing(self.dir.clone()));
        }
        self.inner.open().await
    }

    async fn next_payload(&mut self) -> StreamResult<Option<FramePayload>> {
        let payload = self.inner.next_payload().await?;
        if let Some(payload) = &payload {
            self.write(payload).await;
        }
        Ok(payload)
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }

    fn describe(&self) -> String {
        format!("{} (dumping to {})", self.inner.describe(), self.dir.display())
    }
}

/// Create the dump directory, wiping anything already in it when `clean` is set.
pub fn prepare_dump_dir(dir: &Path, clean: bool) -> io::Result<()> {
    if clean && dir.exists() {
        std::fs::remove_dir_all(dir)?;
        info!(path = %dir.display(), "cleared previous frame dump");
    }
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{payload, VecSource};
    use std::sync::atomic::Ordering;

    fn dumped_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn every_payload_is_written_and_passed_on() {
        let tmp = tempfile::tempdir().unwrap();
        let frames = vec![payload(b"first"), payload(b"second"), payload(b"third")];
        let mut dump = FrameDump::new(Box::new(VecSource::new(frames.clone())), tmp.path());

        dump.open().await.unwrap();
        let mut passed = Vec::new();
        while let Some(p) = dump.next_payload().await.unwrap() {
            passed.push(p);
        }
        dump.close().await;

        assert_eq!(passed, frames);

        let files = dumped_files(tmp.path());
        assert_eq!(files.len(), 3);
        let contents: Vec<Vec<u8>> = files.iter().map(|f| std::fs::read(f).unwrap()).collect();
        assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
        for file in &files {
            assert_eq!(file.extension().unwrap(), "jpg");
        }
    }

    #[tokio::test]
    async fn missing_directory_fails_open_before_the_inner_source() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let source = VecSource::new(vec![payload(b"x")]);
        let opens = source.opens();
        let mut dump = FrameDump::new(Box::new(source), &missing);

        assert!(matches!(dump.open().await, Err(StreamError::DumpDirMissing(p)) if p == missing));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_failures_do_not_drop_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("frames");
        std::fs::create_dir(&dir).unwrap();
        let mut dump = FrameDump::new(Box::new(VecSource::new(vec![payload(b"kept")])), &dir);

        dump.open().await.unwrap();
        std::fs::remove_dir(&dir).unwrap();

        assert_eq!(dump.next_payload().await.unwrap(), Some(payload(b"kept")));
        assert_eq!(dump.next_payload().await.unwrap(), None);
    }

    #[test]
    fn stamps_strictly_increase() {
        let mut dump = FrameDump::new(Box::new(VecSource::new(Vec::new())), "unused");
        let stamps: Vec<i64> = (0..1000).map(|_| dump.next_stamp()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prepare_creates_and_optionally_cleans() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");

        prepare_dump_dir(&dir, false).unwrap();
        assert!(dir.is_dir());

        std::fs::write(dir.join("old.jpg"), b"old").unwrap();
        prepare_dump_dir(&dir, false).unwrap();
        assert!(dir.join("old.jpg").exists());

        prepare_dump_dir(&dir, true).unwrap();
        assert!(dir.is_dir());
        assert!(!dir.join("old.jpg").exists());
    }
}
