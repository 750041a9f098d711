//! The jetstream manager: couples the firehose client and the job registry
//! into a single lifecycle, starting the connection on the first job and
//! tearing it down after a grace window once the last job leaves.

mod error;
mod manager;
mod types;

pub use error::ManagerError;
pub use manager::JetstreamManager;
pub use types::{ManagerStatus, RegisterJobRequest};
