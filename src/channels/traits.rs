//! Channel Trait Definitions
//!
//! Host-agnostic shapes for inbound invocations, inbound replies and outbound
//! messages. The selection core and every command only talk to a [`ReplySink`].

use crate::resources::ResourceHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error types for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Media upload failed: {0}")]
    MediaUploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Channel not ready")]
    NotReady,
}

/// Attachment type as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentKind {
    Photo,
    Audio,
    Video,
    Document,
    Sticker,
    Unknown,
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentKind::Photo => write!(f, "photo"),
            AttachmentKind::Audio => write!(f, "audio"),
            AttachmentKind::Video => write!(f, "video"),
            AttachmentKind::Document => write!(f, "document"),
            AttachmentKind::Sticker => write!(f, "sticker"),
            AttachmentKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Attachment on the message being replied to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Attachment {
    pub fn photo(url: &str) -> Self {
        Self {
            kind: AttachmentKind::Photo,
            url: url.to_string(),
            width: None,
            height: None,
        }
    }
}

/// What the invoking message replied to, if anything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyContext {
    pub attachments: Vec<Attachment>,
    pub body: Option<String>,
}

impl ReplyContext {
    /// First photo attachment, if the replied-to message carried one
    pub fn first_photo(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.kind == AttachmentKind::Photo)
    }
}

/// A parsed command invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Command name as typed (without prefix, lowercased)
    pub command: String,

    /// Whitespace separated argument tokens
    pub args: Vec<String>,

    /// Sender identifier (normalized)
    pub sender_id: String,

    /// Chat/conversation ID
    pub chat_id: String,

    /// Message this invocation replied to
    pub reply_context: Option<ReplyContext>,
}

impl Invocation {
    pub fn new(command: &str, args: &[&str], sender_id: &str) -> Self {
        Self {
            command: command.to_lowercase(),
            args: args.iter().map(|s| s.to_string()).collect(),
            sender_id: sender_id.to_string(),
            chat_id: sender_id.to_string(),
            reply_context: None,
        }
    }

    pub fn with_reply_context(mut self, ctx: ReplyContext) -> Self {
        self.reply_context = Some(ctx);
        self
    }

    /// All arguments joined back into one string
    pub fn text(&self) -> String {
        self.args.join(" ").trim().to_string()
    }
}

/// A message that replies to one of our own tracked messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundReply {
    pub replied_to_message_id: String,
    pub sender_id: String,
    pub body: String,
}

impl InboundReply {
    pub fn new(replied_to: &str, sender_id: &str, body: &str) -> Self {
        Self {
            replied_to_message_id: replied_to.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
        }
    }
}

/// Reply to send back through the channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundReply {
    pub body: String,
    pub attachments: Vec<ResourceHandle>,
}

impl OutboundReply {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, handle: ResourceHandle) -> Self {
        self.attachments.push(handle);
        self
    }

    pub fn with_attachments(mut self, handles: impl IntoIterator<Item = ResourceHandle>) -> Self {
        self.attachments.extend(handles);
        self
    }
}

/// Output abstraction. Sending returns the new message's ID, which can be
/// used as a correlation key for a pending selection.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, reply: OutboundReply) -> Result<String, ChannelError>;

    /// Remove a previously sent message (used for "please wait" notices)
    async fn delete(&self, message_id: &str) -> Result<(), ChannelError>;
}
