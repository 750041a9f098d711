//! Durable persistence for the Jetstream replay cursor.
//!
//! Backends implement the [`CursorStore`] trait; callers pick one at
//! startup based on configuration and never need to know which.

mod error;
mod file;
mod memory;
mod record;
mod remote;
mod store;

pub use error::CursorError;
pub use file::FileCursorStore;
pub use memory::MemoryCursorStore;
pub use record::CursorRecord;
pub use remote::RemoteKvCursorStore;
pub use store::CursorStore;
