// Vote Transport Port (Interface)

use std::fmt;

use crate::error::Result;
use async_trait::async_trait;

/// Vote polarity reported back to the review system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Approve,
    Reject,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Approve => write!(f, "+1"),
            Vote::Reject => write!(f, "-1"),
        }
    }
}

/// Posts a verdict on a commit upstream.
#[async_trait]
pub trait VoteTransport: Send + Sync {
    async fn vote(&self, commit_id: &str, vote: Vote, message: &str) -> Result<()>;
}
