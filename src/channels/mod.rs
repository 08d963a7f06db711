//! Channel Abstractions
//!
//! Inbound and outbound message shapes shared by the commands, the selection
//! resolver and the host integration (Telegram, console).

pub mod memory;
pub mod traits;

pub use memory::{MemorySink, SentMessage};
pub use traits::{
    Attachment, AttachmentKind, ChannelError, InboundReply, Invocation, OutboundReply, ReplyContext,
    ReplySink,
};
