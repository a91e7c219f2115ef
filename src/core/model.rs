use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

pub type ItemId = Uuid;

/// Privacy of the created video; serialized as the remote `privacyStatus` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Unlisted => "unlisted",
            Visibility::Public => "public",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown visibility: {0} (expected private, unlisted or public)")]
pub struct ParseVisibilityError(String);

impl FromStr for Visibility {
    type Err = ParseVisibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "unlisted" => Ok(Visibility::Unlisted),
            "public" => Ok(Visibility::Public),
            _ => Err(ParseVisibilityError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Queued,
    Uploading,
    Done,
    Error,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Error | ItemStatus::Skipped)
    }
}

/// Handle to a local file. Content stays on disk and is streamed at upload time.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: ItemId,
    pub payload: FilePayload,
    pub visibility: Visibility,
    pub status: ItemStatus,
    /// Percentage in [0, 100].
    pub progress: f64,
    pub error_message: Option<String>,
    pub video_id: Option<String>,
    /// Set the first time the item leaves `Queued`; visibility is frozen from then on.
    pub visibility_locked: bool,
}

impl QueueItem {
    pub fn new(payload: FilePayload, visibility: Visibility) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            visibility,
            status: ItemStatus::Queued,
            progress: 0.0,
            error_message: None,
            video_id: None,
            visibility_locked: false,
        }
    }

    pub fn request(&self) -> UploadRequest {
        UploadRequest {
            item_id: self.id,
            payload: self.payload.clone(),
            visibility: self.visibility,
        }
    }
}

/// What the negotiator and transport see of an item for one attempt.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub item_id: ItemId,
    pub payload: FilePayload,
    pub visibility: Visibility,
}

/// Server-issued URI of a resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLocation(pub Url);

impl fmt::Display for SessionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource descriptor returned by the remote API once the body is accepted.
#[derive(Debug, Clone)]
pub struct UploadedVideo {
    pub id: Option<String>,
}

impl UploadedVideo {
    pub fn from_json(body: serde_json::Value) -> Self {
        let id = body.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());
        Self { id }
    }
}
