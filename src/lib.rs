//! Astral chat-bot commands
//!
//! Command plugins that call remote AI, media and marketplace APIs, plus the
//! pending selection protocol that lets a user continue a command by replying
//! to the bot's own message (pick a search result, choose an image from a
//! grid, keep talking to a chat backend).
//!
//! # Architecture
//!
//! ```text
//! Telegram / console ──► App ──► MessageRouter
//!                                   │
//!                   ┌───────────────┴───────────────┐
//!                   ▼                               ▼
//!            CommandRegistry                SelectionResolver
//!                   │                               │
//!                   ├── FetchClient ◄───────────────┤
//!                   ├── ApiDirectory (moka)         ├── PendingSelectionStore
//!                   └── ResourceCache ◄─────────────┘
//! ```

pub mod api_directory;
pub mod app;
pub mod channels;
pub mod commands;
pub mod config;
pub mod error;
pub mod fetch;
pub mod imaging;
pub mod resources;
pub mod router;
pub mod selection;
pub mod telegram;

pub use app::{App, Handled, IncomingText};
pub use channels::{InboundReply, Invocation, MemorySink, OutboundReply, ReplySink};
pub use commands::{Command, CommandRegistry, Services};
pub use config::{Config, Endpoints};
pub use error::CommandError;
pub use fetch::{FetchClient, FetchError};
pub use resources::{ResourceCache, ResourceHandle, ScopedResources};
pub use router::{MessageRouter, Route};
pub use selection::{
    InMemorySelectionStore, Outcome, PendingSelection, PendingSelectionStore, SelectionKind, SelectionResolver,
};
