//! Selection Resolver
//!
//! Consumes one inbound reply against the pending selection it answers:
//! claim → parse → handler → reply → dispose. Every resource created during a
//! turn is released on every exit path unless the handler hands it to a
//! continuation.

use super::grammar::{Grammar, ReplyChoice};
use super::store::{Claim, PendingSelectionStore};
use super::types::{PendingSelection, SelectionKind, SelectionPayload};
use crate::channels::{InboundReply, OutboundReply, ReplySink};
use crate::error::CommandError;
use crate::resources::{ResourceCache, ResourceHandle, ScopedResources};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const GENERIC_FAILURE: &str = "❌ Something went wrong. Please try again later.";

/// What happens to an entry when its handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Remove,
    Keep,
}

/// What happens to an entry after a successful turn
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    /// Single-shot: remove the entry
    Done,
    /// Keep the entry as it is, on the same key
    Stay,
    /// Re-attach to the message just sent, with new state
    Continue {
        payload: SelectionPayload,
        resources: Vec<ResourceHandle>,
    },
}

/// Successful handler result
#[derive(Debug)]
pub struct Resolution {
    pub reply: OutboundReply,
    pub next: Continuation,
}

impl Resolution {
    pub fn done(reply: OutboundReply) -> Self {
        Self {
            reply,
            next: Continuation::Done,
        }
    }

    pub fn stay(reply: OutboundReply) -> Self {
        Self {
            reply,
            next: Continuation::Stay,
        }
    }

    pub fn continue_with(reply: OutboundReply, payload: SelectionPayload, resources: Vec<ResourceHandle>) -> Self {
        Self {
            reply,
            next: Continuation::Continue { payload, resources },
        }
    }
}

/// Observable result of one resolution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Resolved {
        reply: OutboundReply,
        message_id: String,
    },
    InvalidInput(String),
    /// No visible effect (unknown key, foreign sender, busy, tolerated text)
    Ignored,
    Failed(String),
}

/// Kind-specific follow-up
#[async_trait]
pub trait SelectionHandler: Send + Sync {
    /// Grammar accepted for this entry
    fn grammar(&self, selection: &PendingSelection) -> Grammar;

    /// Perform the follow-up. Files needed only for this turn go into `scope`.
    /// `sink` may be used for transient progress messages; the final reply is
    /// returned, not sent.
    async fn resolve(
        &self,
        selection: &PendingSelection,
        choice: ReplyChoice,
        reply: &InboundReply,
        scope: &mut ScopedResources,
        sink: &dyn ReplySink,
    ) -> Result<Resolution, CommandError>;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Keep
    }
}

/// Routes inbound replies to the handler registered for the entry's kind
pub struct SelectionResolver {
    store: Arc<dyn PendingSelectionStore>,
    cache: Arc<ResourceCache>,
    handlers: HashMap<SelectionKind, Arc<dyn SelectionHandler>>,
}

impl SelectionResolver {
    pub fn new(store: Arc<dyn PendingSelectionStore>, cache: Arc<ResourceCache>) -> Self {
        Self {
            store,
            cache,
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: SelectionKind, handler: Arc<dyn SelectionHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn store(&self) -> &Arc<dyn PendingSelectionStore> {
        &self.store
    }

    pub fn handles(&self, kind: SelectionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Whether a reply to `message_id` would be routed here
    pub async fn is_tracked(&self, message_id: &str) -> bool {
        self.store.get(message_id).await.is_some()
    }

    pub async fn resolve(&self, inbound: &InboundReply, sink: &dyn ReplySink) -> Outcome {
        let key = inbound.replied_to_message_id.as_str();

        let selection = match self.store.claim(key, &inbound.sender_id).await {
            Claim::Granted(selection) => selection,
            Claim::NotFound => return Outcome::Ignored,
            Claim::NotOwner => {
                debug!("Reply to {} from non-owner {} ignored", key, inbound.sender_id);
                return Outcome::Ignored;
            }
            Claim::Busy => {
                debug!("Selection {} already resolving; reply ignored", key);
                return Outcome::Ignored;
            }
        };

        // a panicking or cancelled turn must not leave the entry in flight
        let mut guard = ClaimGuard::new(self.store.clone(), key);
        let outcome = self.resolve_claimed(selection, inbound, sink).await;
        guard.disarm();
        outcome
    }

    /// Runs one turn on a claimed entry; every return path disposes of the claim
    async fn resolve_claimed(
        &self,
        selection: PendingSelection,
        inbound: &InboundReply,
        sink: &dyn ReplySink,
    ) -> Outcome {
        let key = inbound.replied_to_message_id.as_str();

        let Some(handler) = self.handlers.get(&selection.kind).cloned() else {
            error!("No handler registered for selection kind {}", selection.kind);
            self.store.remove(key).await;
            send_quietly(sink, OutboundReply::text(GENERIC_FAILURE)).await;
            return Outcome::Failed(GENERIC_FAILURE.to_string());
        };

        let grammar = handler.grammar(&selection);
        let choice = grammar.parse(&inbound.body);
        if choice == ReplyChoice::Invalid {
            self.store.release_claim(key).await;
            if grammar.tolerates_free_text() {
                return Outcome::Ignored;
            }
            let hint = grammar.hint();
            send_quietly(sink, OutboundReply::text(&hint)).await;
            return Outcome::InvalidInput(hint);
        }

        info!("Resolving {} selection {} with {:?}", selection.kind, key, choice);

        let mut scope = ScopedResources::new(self.cache.clone());
        let result = handler.resolve(&selection, choice, inbound, &mut scope, sink).await;

        let outcome = match result {
            Ok(resolution) => self.finish(&selection, resolution, &mut scope, sink, handler.failure_policy()).await,
            Err(e) => self.fail(&selection, e, sink, handler.failure_policy()).await,
        };

        scope.release().await;
        outcome
    }

    async fn finish(
        &self,
        selection: &PendingSelection,
        resolution: Resolution,
        scope: &mut ScopedResources,
        sink: &dyn ReplySink,
        policy: FailurePolicy,
    ) -> Outcome {
        let key = selection.correlation_key.as_str();
        let reply = resolution.reply.clone();

        let message_id = match sink.send(resolution.reply).await {
            Ok(id) => id,
            Err(e) => return self.fail(selection, e.into(), sink, policy).await,
        };

        match resolution.next {
            Continuation::Done => self.store.remove(key).await,
            Continuation::Stay => self.store.release_claim(key).await,
            Continuation::Continue { payload, resources } => {
                for handle in &resources {
                    scope.detach(handle);
                }
                if let Err(e) = self.store.replace(key, &message_id, payload, resources.clone()).await {
                    // Entry vanished mid-turn (overwritten); the new state has no owner
                    warn!("Could not continue selection {}: {}", key, e);
                    self.cache.release_all(resources.iter()).await;
                }
            }
        }

        Outcome::Resolved { reply, message_id }
    }

    async fn fail(
        &self,
        selection: &PendingSelection,
        err: CommandError,
        sink: &dyn ReplySink,
        policy: FailurePolicy,
    ) -> Outcome {
        let key = selection.correlation_key.as_str();
        match &err {
            CommandError::Internal(detail) => error!("{} selection {} broken: {}", selection.kind, key, detail),
            other => warn!("{} selection {} failed: {}", selection.kind, key, other),
        }

        let message = err.user_message();
        send_quietly(sink, OutboundReply::text(&message)).await;

        let policy = if matches!(err, CommandError::Internal(_)) {
            FailurePolicy::Remove
        } else {
            policy
        };
        match policy {
            FailurePolicy::Remove => self.store.remove(key).await,
            FailurePolicy::Keep => self.store.release_claim(key).await,
        }

        Outcome::Failed(message)
    }
}

/// Releases a claim whose turn ended without reaching a normal exit
struct ClaimGuard {
    store: Arc<dyn PendingSelectionStore>,
    key: String,
    armed: bool,
}

impl ClaimGuard {
    fn new(store: Arc<dyn PendingSelectionStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Selection {} turn aborted; releasing claim", key);
                let store = self.store.clone();
                runtime.spawn(async move { store.release_claim(&key).await });
            }
            Err(_) => error!("Selection {} turn aborted outside a runtime; claim stays held", key),
        }
    }
}

async fn send_quietly(sink: &dyn ReplySink, reply: OutboundReply) {
    if let Err(e) = sink.send(reply).await {
        warn!("Failed to send reply: {}", e);
    }
}
