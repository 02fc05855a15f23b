// Artifact Store Port (Interface)

use std::path::Path;

use crate::error::Result;
use async_trait::async_trait;

/// Upload backend for harvested logs.
///
/// Implementations must be idempotent under retry: re-uploading an
/// unchanged file is a no-op, a checksum mismatch is retried up to a
/// configured attempt budget and then raised.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload everything under `local_dir` below `remote_prefix` and
    /// return the public URL of the result index.
    async fn upload(&self, local_dir: &Path, remote_prefix: &str) -> Result<String>;
}
