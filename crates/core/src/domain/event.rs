// Review-system notification events
//
// Deserialized from the JSON lines emitted by the review system's event
// stream. Only the fields the filter engine and the orchestrator read are
// modeled; unknown event kinds map to `EventKind::Unknown` instead of
// failing the whole stream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CommentAdded,
    PatchsetCreated,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub project: String,
    pub branch: String,
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patchset {
    /// The patchset ref under test, e.g. `refs/changes/61/65261/7`.
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub change: Option<Change>,
    #[serde(default)]
    pub patchset: Option<Patchset>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub author: Option<Account>,
}
