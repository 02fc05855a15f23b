// Event Source Port (Interface)

use crate::domain::ReviewEvent;
use crate::error::Result;
use async_trait::async_trait;

/// Pull-based review-event feed.
///
/// One call may return only the oldest pending event, so consumers drain in
/// a loop until `Ok(None)`.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn get_event(&self) -> Result<Option<ReviewEvent>>;
}
