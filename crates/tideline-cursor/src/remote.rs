use async_trait::async_trait;

use crate::error::CursorError;
use crate::record::CursorRecord;
use crate::store::CursorStore;

/// Placeholder for a shared key-value backend (e.g. Redis) so multiple
/// Jetstream client instances could coordinate a single cursor.
///
/// Construction always fails: no remote-kv client is wired up in this
/// repo yet, and we'd rather fail loudly at startup than silently fall
/// back to an unrelated backend. See the open question this resolves in
/// `DESIGN.md`.
pub struct RemoteKvCursorStore {
    _private: (),
}

impl RemoteKvCursorStore {
    pub fn connect(_endpoint: &str) -> Result<Self, CursorError> {
        Err(CursorError::BackendNotImplemented("remote-kv"))
    }
}

#[async_trait]
impl CursorStore for RemoteKvCursorStore {
    async fn get(&self) -> Result<Option<CursorRecord>, CursorError> {
        Err(CursorError::BackendNotImplemented("remote-kv"))
    }

    async fn set(&self, _record: CursorRecord) -> Result<(), CursorError> {
        Err(CursorError::BackendNotImplemented("remote-kv"))
    }

    async fn flush(&self) -> Result<(), CursorError> {
        Err(CursorError::BackendNotImplemented("remote-kv"))
    }

    async fn clear(&self) -> Result<(), CursorError> {
        Err(CursorError::BackendNotImplemented("remote-kv"))
    }
}
