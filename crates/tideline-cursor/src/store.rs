use async_trait::async_trait;

use crate::error::CursorError;
use crate::record::CursorRecord;

/// Durable storage for the Jetstream replay cursor.
///
/// Implementations must guarantee that a successful `set` is visible to a
/// subsequent `get` on the same process, and that `flush` blocks until any
/// buffered write has reached the backing store. Between two successive
/// flushes, at most one write reaches the backend, and only if the pending
/// cursor changed since the last one actually written (spec §4.2 batching
/// invariant).
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the last persisted cursor, if any has ever been written.
    async fn get(&self) -> Result<Option<CursorRecord>, CursorError>;

    /// Record a new cursor value as pending. Backends are free to buffer
    /// this and flush on their own schedule (`saveCursor` in spec terms);
    /// callers that need a durability barrier should call `flush`
    /// afterward.
    async fn set(&self, record: CursorRecord) -> Result<(), CursorError>;

    /// Force any buffered write to reach the backing store. A no-op if the
    /// pending value already matches the last value actually written.
    async fn flush(&self) -> Result<(), CursorError>;

    /// Remove any persisted cursor, resetting the backend to its initial
    /// empty state.
    async fn clear(&self) -> Result<(), CursorError>;

    /// `saveCursorImmediate` in spec terms: record and flush in one call.
    async fn set_immediate(&self, record: CursorRecord) -> Result<(), CursorError> {
        self.set(record).await?;
        self.flush().await
    }
}
