//! Inbound Message Router
//!
//! Decides whether an incoming text is a command invocation, a reply to one
//! of our tracked messages (handed to the selection resolver), or neither.
//!
//! Precedence: a reply to a tracked message goes to the resolver unless its
//! text is the prefix followed by a known command name, so `/mj cat` sent as
//! a reply to a grid still starts a new generation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// Telegram appends `@botname` to commands in group chats
static BOT_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@[A-Za-z0-9_]+$").expect("valid regex"));

/// Where an inbound message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Prefixed invocation of a known command
    Command { name: String, args: Vec<String> },
    /// Reply to a tracked message
    Reply,
    /// Nothing to do
    Other,
}

/// Prefix + command-name router
pub struct MessageRouter {
    command_pattern: Regex,
    known: HashSet<String>,
}

impl MessageRouter {
    pub fn new<I, S>(prefix: &str, known: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let command_pattern = Regex::new(&format!(r"(?s)^\s*{}(\S+)(.*)$", regex::escape(prefix)))?;
        Ok(Self {
            command_pattern,
            known: known.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
        })
    }

    /// Parse `<prefix><name> args...` without checking the name
    pub fn parse_command(&self, text: &str) -> Option<(String, Vec<String>)> {
        let caps = self.command_pattern.captures(text)?;
        let raw = caps.get(1)?.as_str();
        let name = BOT_MENTION.replace(raw, "").to_lowercase();
        if name.is_empty() {
            return None;
        }
        let args = caps
            .get(2)
            .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Some((name, args))
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(&name.to_lowercase())
    }

    /// Route a message. `replies_to_tracked` says whether it replies to a
    /// message with a live pending selection.
    pub fn route(&self, text: &str, replies_to_tracked: bool) -> Route {
        let command = self.parse_command(text).filter(|(name, _)| self.is_known(name));

        let route = match (command, replies_to_tracked) {
            (Some((name, args)), _) => Route::Command { name, args },
            (None, true) => Route::Reply,
            (None, false) => Route::Other,
        };
        debug!("Routed {:?} -> {:?}", text.chars().take(40).collect::<String>(), route);
        route
    }
}
