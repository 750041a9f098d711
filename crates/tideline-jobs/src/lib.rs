//! Job registry and keyword router: holds every active analysis job and,
//! for each inbound post, determines which jobs match and dispatches one
//! outbound event per match.

mod error;
mod job;
mod keywords;
mod registry;

pub use error::RegistryError;
pub use job::{JobConfig, JobMatchEvent, JobOutcome, JobState, OnComplete, OnData};
pub use keywords::{compile_match_regex, extract_keywords};
pub use registry::{JobRegistry, JobSnapshot};
