//! Pending selection records

use crate::resources::ResourceHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Producing command family; decides payload shape and reply grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionKind {
    VideoSearch,
    SongSearch,
    MidjourneyGrid,
    MidjourneyTask,
    FluxGrid,
    MetaGenGrid,
    ChatThread,
}

impl SelectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideoSearch => "video-search",
            Self::SongSearch => "song-search",
            Self::MidjourneyGrid => "midjourney-grid",
            Self::MidjourneyTask => "midjourney-task",
            Self::FluxGrid => "flux-grid",
            Self::MetaGenGrid => "metagen-grid",
            Self::ChatThread => "chat-thread",
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download format for media searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaFormat {
    Video,
    Audio,
}

impl MediaFormat {
    /// Parse the `-v` / `-a` switch
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "-v" => Some(Self::Video),
            "-a" => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }

    pub fn quality_label(&self) -> &'static str {
        match self {
            Self::Video => "360p",
            Self::Audio => "128kbps",
        }
    }
}

/// One search hit offered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub source_url: String,
    pub thumbnail_url: Option<String>,
    pub duration: Option<String>,
    pub author: Option<String>,
}

impl SearchItem {
    pub fn new(title: &str, source_url: &str) -> Self {
        Self {
            title: title.to_string(),
            source_url: source_url.to_string(),
            thumbnail_url: None,
            duration: None,
            author: None,
        }
    }
}

/// Follow-up button of a remote image task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAction {
    pub label: String,
    pub custom_id: Option<String>,
}

impl TaskAction {
    pub fn new(label: &str, custom_id: Option<&str>) -> Self {
        Self {
            label: label.to_string(),
            custom_id: custom_id.map(str::to_string),
        }
    }
}

/// Command-specific data needed to resolve a choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionPayload {
    Search {
        items: Vec<SearchItem>,
        format: MediaFormat,
        /// API base resolved when the list was produced
        api_base: Option<String>,
    },
    ImageGrid {
        image_urls: Vec<String>,
    },
    RemoteTask {
        task_id: String,
        actions: Vec<TaskAction>,
        prompt: String,
        grid_url: String,
    },
    Conversation {
        backend: String,
    },
}

impl SelectionPayload {
    /// Number of numerically selectable items
    pub fn item_count(&self) -> usize {
        match self {
            Self::Search { items, .. } => items.len(),
            Self::ImageGrid { image_urls } => image_urls.len(),
            Self::RemoteTask { .. } => 4,
            Self::Conversation { .. } => 0,
        }
    }
}

/// An open, resolvable choice offered to one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelection {
    pub correlation_key: String,
    pub owner_id: String,
    pub kind: SelectionKind,
    pub payload: SelectionPayload,
    pub created_at: DateTime<Utc>,
    /// Files deleted when this entry is disposed
    pub resources: Vec<ResourceHandle>,
}

impl PendingSelection {
    pub fn new(
        correlation_key: &str,
        owner_id: &str,
        kind: SelectionKind,
        payload: SelectionPayload,
        resources: Vec<ResourceHandle>,
    ) -> Self {
        Self {
            correlation_key: correlation_key.to_string(),
            owner_id: owner_id.to_string(),
            kind,
            payload,
            created_at: Utc::now(),
            resources,
        }
    }
}
