// Gatewatch Infrastructure - Remote Adapters
// Implements: RemoteExecutor (ssh/scp), EventSource (review stream),
// VoteTransport (review CLI over ssh), ArtifactStore (HTTP object store),
// NodePool (inventory REST API)

mod artifact;
mod events;
mod inventory;
mod ssh;
mod vote;

pub use artifact::HttpArtifactStore;
pub use events::StreamEventSource;
pub use inventory::HttpNodePool;
pub use ssh::SshExecutor;
pub use vote::SshVoteTransport;
