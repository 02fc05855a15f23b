// Port Layer - Interfaces for external dependencies

pub mod artifact_store;
pub mod event_source;
pub mod job_repository;
pub mod node_pool;
pub mod remote_executor;
pub mod time_provider;
pub mod vote_transport;

// Re-exports
pub use artifact_store::ArtifactStore;
pub use event_source::EventSource;
pub use job_repository::JobRepository;
pub use node_pool::{NodeHandle, NodePool};
pub use remote_executor::{CommandOutput, RemoteExecutor};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use vote_transport::{Vote, VoteTransport};
