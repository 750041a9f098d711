use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::CursorError;
use crate::record::CursorRecord;
use crate::store::CursorStore;

/// Default interval between batched flushes to disk. Matches the spec's
/// `JETSTREAM_CURSOR_AUTO_SAVE_MS` default.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

enum Command {
    Set(CursorRecord),
    Clear,
    Flush(oneshot::Sender<Result<(), CursorError>>),
    SetAutoSave(bool),
}

/// File-backed cursor store. Writes are buffered in memory and flushed to
/// disk on a timer by a dedicated background task, using a write-to-temp,
/// then-rename sequence so a crash mid-write never leaves a truncated or
/// partially-written cursor file behind.
pub struct FileCursorStore {
    mirror: RwLock<Option<CursorRecord>>,
    tx: mpsc::UnboundedSender<Command>,
    auto_save_enabled: AtomicBool,
}

impl FileCursorStore {
    /// Open (or create) a file-backed cursor store at `path`, flushing
    /// buffered writes to disk every `DEFAULT_FLUSH_INTERVAL` while
    /// auto-save is enabled (the default).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CursorError> {
        Self::open_with_interval(path, DEFAULT_FLUSH_INTERVAL).await
    }

    pub async fn open_with_interval(
        path: impl AsRef<Path>,
        flush_interval: Duration,
    ) -> Result<Self, CursorError> {
        let path = path.as_ref().to_path_buf();
        let initial = Self::read_from_disk(&path).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_flush_loop(path, flush_interval, initial, rx));

        Ok(Self {
            mirror: RwLock::new(initial),
            tx,
            auto_save_enabled: AtomicBool::new(true),
        })
    }

    async fn read_from_disk(path: &Path) -> Result<Option<CursorRecord>, CursorError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_to_disk(path: &Path, record: CursorRecord) -> Result<(), CursorError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let dir = dir.to_path_buf();
        let path = path.to_path_buf();
        let bytes = serde_json::to_vec(&record)?;

        tokio::task::spawn_blocking(move || -> Result<(), CursorError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            use std::io::Write;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CursorError::Io(std::io::Error::other(e)))??;

        Ok(())
    }

    async fn remove_from_disk(path: &Path) -> Result<(), CursorError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Toggle the periodic flush. Disabling auto-save does not affect
    /// explicit `flush()` calls.
    pub fn set_auto_save(&self, enabled: bool) {
        self.auto_save_enabled.store(enabled, Ordering::Relaxed);
        let _ = self.tx.send(Command::SetAutoSave(enabled));
    }

    async fn run_flush_loop(
        path: PathBuf,
        flush_interval: Duration,
        initial: Option<CursorRecord>,
        mut rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut pending: Option<CursorRecord> = None;
        let mut last_written = initial;
        let mut auto_save = true;
        let mut ticker = interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                cmd = rx.recv() => {
                    match cmd {
                        Some(Command::Set(record)) => pending = Some(record),
                        Some(Command::Clear) => {
                            pending = None;
                            last_written = None;
                            if let Err(e) = Self::remove_from_disk(&path).await {
                                warn!(error = %e, "failed to clear cursor file");
                            }
                        }
                        Some(Command::SetAutoSave(enabled)) => auto_save = enabled,
                        Some(Command::Flush(ack)) => {
                            let result = Self::drain(&path, &mut pending, &mut last_written).await;
                            let _ = ack.send(result);
                        }
                        None => {
                            let _ = Self::drain(&path, &mut pending, &mut last_written).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick(), if auto_save => {
                    if let Err(e) = Self::drain(&path, &mut pending, &mut last_written).await {
                        warn!(error = %e, "failed to flush cursor to disk");
                    }
                }
            }
        }
    }

    /// Write `pending` to disk if and only if its cursor is newer than the
    /// last value actually written; idempotent otherwise. Never lets an
    /// older pending value overwrite a newer one already on disk (spec §5:
    /// the persistence layer "MUST NOT overwrite a newer value with an
    /// older pending one").
    async fn drain(
        path: &Path,
        pending: &mut Option<CursorRecord>,
        last_written: &mut Option<CursorRecord>,
    ) -> Result<(), CursorError> {
        let Some(record) = pending.take() else {
            return Ok(());
        };

        if let Some(last) = last_written.as_ref() {
            if record.cursor_us <= last.cursor_us {
                return Ok(());
            }
        }

        let cursor_us = record.cursor_us;
        Self::write_to_disk(path, record.clone()).await?;
        *last_written = Some(record);
        debug!(cursor_us, "cursor flushed to disk");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn get(&self) -> Result<Option<CursorRecord>, CursorError> {
        Ok(self.mirror.read().await.clone())
    }

    async fn set(&self, record: CursorRecord) -> Result<(), CursorError> {
        *self.mirror.write().await = Some(record.clone());
        self.tx
            .send(Command::Set(record))
            .map_err(|_| CursorError::Closed)
    }

    async fn flush(&self) -> Result<(), CursorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| CursorError::Closed)?;
        ack_rx.await.map_err(|_| CursorError::Closed)?
    }

    async fn clear(&self) -> Result<(), CursorError> {
        *self.mirror.write().await = None;
        self.tx.send(Command::Clear).map_err(|_| CursorError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn round_trips_through_a_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let store = FileCursorStore::open(&path).await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);

        let record = CursorRecord::new(42, Utc::now());
        store.set(record.clone()).await.unwrap();
        store.flush().await.unwrap();

        let on_disk = tokio::fs::read(&path).await.unwrap();
        let parsed: CursorRecord = serde_json::from_slice(&on_disk).unwrap();
        assert_eq!(parsed, record);
    }

    #[tokio::test]
    async fn reopening_loads_the_last_flushed_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let record = CursorRecord::new(7, Utc::now());
        {
            let store = FileCursorStore::open(&path).await.unwrap();
            store.set(record.clone()).await.unwrap();
            store.flush().await.unwrap();
        }

        let reopened = FileCursorStore::open(&path).await.unwrap();
        assert_eq!(reopened.get().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn unflushed_set_is_visible_in_memory_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let store = FileCursorStore::open(&path).await.unwrap();
        let record = CursorRecord::new(99, Utc::now());
        store.set(record.clone()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn flush_is_a_no_op_when_pending_matches_last_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let store = FileCursorStore::open(&path).await.unwrap();
        let record = CursorRecord::new(5, Utc::now());

        store.set(record.clone()).await.unwrap();
        store.flush().await.unwrap();
        let written_once = tokio::fs::metadata(&path).await.unwrap().modified().unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.set(record.clone()).await.unwrap();
        store.flush().await.unwrap();
        let written_twice = tokio::fs::metadata(&path).await.unwrap().modified().unwrap();

        assert_eq!(written_once, written_twice);
    }

    #[tokio::test]
    async fn an_older_pending_cursor_does_not_overwrite_a_newer_persisted_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let store = FileCursorStore::open(&path).await.unwrap();

        store.set(CursorRecord::new(100, Utc::now())).await.unwrap();
        store.flush().await.unwrap();

        store.set(CursorRecord::new(50, Utc::now())).await.unwrap();
        store.flush().await.unwrap();

        let on_disk = tokio::fs::read(&path).await.unwrap();
        let parsed: CursorRecord = serde_json::from_slice(&on_disk).unwrap();
        assert_eq!(parsed.cursor_us, 100, "an out-of-order set must not regress the persisted cursor");
    }

    #[tokio::test]
    async fn clear_removes_the_file_and_the_in_memory_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let store = FileCursorStore::open(&path).await.unwrap();
        store
            .set(CursorRecord::new(1, Utc::now()))
            .await
            .unwrap();
        store.flush().await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn set_auto_save_false_suppresses_the_periodic_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let store =
            FileCursorStore::open_with_interval(&path, Duration::from_millis(20))
                .await
                .unwrap();
        store.set_auto_save(false);
        store
            .set(CursorRecord::new(1, Utc::now()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!path.exists());
    }
}
