use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CursorError;
use crate::record::CursorRecord;
use crate::store::CursorStore;

/// Non-durable cursor store. Useful for tests and for deployments that
/// always start from `{replayWindowSeconds}` rather than resuming.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    current: RwLock<Option<CursorRecord>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get(&self) -> Result<Option<CursorRecord>, CursorError> {
        Ok(self.current.read().await.clone())
    }

    async fn set(&self, record: CursorRecord) -> Result<(), CursorError> {
        *self.current.write().await = Some(record);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CursorError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CursorError> {
        *self.current.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn starts_empty() {
        let store = MemoryCursorStore::new();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryCursorStore::new();
        let record = CursorRecord::new(1_700_000_000_000_000, Utc::now());
        store.set(record.clone()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn flush_is_a_no_op() {
        let store = MemoryCursorStore::new();
        store.flush().await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_the_stored_cursor() {
        let store = MemoryCursorStore::new();
        store.set(CursorRecord::new(1, Utc::now())).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }
}
