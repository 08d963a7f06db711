//! In-memory reply sink
//!
//! Records every outbound message with a sequential ID. Backs the console
//! mode and doubles as the sink used by tests.

use super::traits::{ChannelError, OutboundReply, ReplySink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;

/// A message captured by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: String,
    pub body: String,
    /// Attachment paths as they were at send time
    pub attachments: Vec<PathBuf>,
    /// Attachment contents read at send time (files may be released afterwards)
    pub attachment_sizes: Vec<u64>,
    pub deleted: bool,
}

#[derive(Default)]
struct SinkState {
    next_id: u64,
    sent: Vec<SentMessage>,
}

/// Sink that keeps everything in memory
#[derive(Default)]
pub struct MemorySink {
    prefix: String,
    echo: bool,
    state: Mutex<SinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_prefix("msg")
    }

    /// IDs are generated as `<prefix>-<n>`
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            echo: false,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Print every message to stdout as it is sent
    pub fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    /// Messages that were not deleted afterwards
    pub fn visible(&self) -> Vec<SentMessage> {
        self.state.lock().sent.iter().filter(|m| !m.deleted).cloned().collect()
    }

    pub fn last(&self) -> Option<SentMessage> {
        self.state.lock().sent.last().cloned()
    }

    pub fn count(&self) -> usize {
        self.state.lock().sent.len()
    }
}

#[async_trait]
impl ReplySink for MemorySink {
    async fn send(&self, reply: OutboundReply) -> Result<String, ChannelError> {
        let mut sizes = Vec::with_capacity(reply.attachments.len());
        for handle in &reply.attachments {
            let meta = tokio::fs::metadata(handle.path())
                .await
                .map_err(|e| ChannelError::MediaUploadFailed(format!("{}: {}", handle.file_name(), e)))?;
            sizes.push(meta.len());
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("{}-{}", self.prefix, state.next_id);

        if self.echo {
            println!("[{}] {}", id, reply.body);
            for handle in &reply.attachments {
                println!("[{}]   attachment: {}", id, handle.path().display());
            }
        }

        state.sent.push(SentMessage {
            id: id.clone(),
            body: reply.body,
            attachments: reply.attachments.iter().map(|h| h.path().to_path_buf()).collect(),
            attachment_sizes: sizes,
            deleted: false,
        });
        Ok(id)
    }

    async fn delete(&self, message_id: &str) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        match state.sent.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.deleted = true;
                Ok(())
            }
            None => Err(ChannelError::DeleteFailed(message_id.to_string())),
        }
    }
}
