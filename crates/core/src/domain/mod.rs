// Domain Layer - pure orchestration logic

pub mod error;
pub mod event;
pub mod filter;
pub mod job;

pub use error::DomainError;
pub use event::{Account, Change, EventKind, Patchset, ReviewEvent};
pub use filter::EventFilter;
pub use job::{Job, JobPatch, JobState};
