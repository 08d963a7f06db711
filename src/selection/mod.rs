//! Pending Selection Protocol
//!
//! A command that offers choices registers a [`PendingSelection`] under the ID
//! of the message it sent. A later reply to that message is handed to the
//! [`SelectionResolver`], which validates sender and grammar and runs the
//! handler registered for the entry's kind.

pub mod grammar;
pub mod resolver;
pub mod store;
pub mod types;

pub use grammar::{grid_slot, Grammar, ReplyChoice};
pub use resolver::{Continuation, FailurePolicy, Outcome, Resolution, SelectionHandler, SelectionResolver};
pub use store::{Claim, InMemorySelectionStore, PendingSelectionStore, StoreError};
pub use types::{MediaFormat, PendingSelection, SearchItem, SelectionKind, SelectionPayload, TaskAction};
