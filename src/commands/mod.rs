//! Command plugins
//!
//! Each command performs one external action and answers through a
//! [`ReplySink`]. Commands that offer choices register a pending selection
//! under the ID of the message they sent; the matching [`SelectionHandler`]
//! is registered with the resolver here as well.

pub mod chat;
pub mod cosplay;
pub mod goatstor;
pub mod imagegen;
pub mod lyrics;
pub mod midjourney;
pub mod upscale;
pub mod youtube;

use crate::api_directory::ApiDirectory;
use crate::channels::{InboundReply, Invocation, OutboundReply, ReplySink};
use crate::config::{Config, Endpoints};
use crate::error::CommandError;
use crate::fetch::FetchClient;
use crate::resources::{ResourceCache, ResourceHandle, ScopedResources};
use crate::selection::{
    Outcome, PendingSelection, PendingSelectionStore, SelectionHandler, SelectionKind, SelectionPayload,
    SelectionResolver,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A chat command
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn description(&self) -> &'static str;

    /// Argument synopsis shown by `help` (without prefix and name)
    fn usage(&self) -> &'static str {
        ""
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError>;
}

/// Shared dependencies handed to every command and handler
pub struct Services {
    pub config: Arc<Config>,
    pub fetch: FetchClient,
    pub cache: Arc<ResourceCache>,
    pub selections: Arc<dyn PendingSelectionStore>,
    pub apis: ApiDirectory,
}

impl Services {
    pub fn new(
        config: Arc<Config>,
        fetch: FetchClient,
        cache: Arc<ResourceCache>,
        selections: Arc<dyn PendingSelectionStore>,
    ) -> Self {
        let apis = ApiDirectory::new(fetch.clone(), config.directory_ttl);
        Self {
            config,
            fetch,
            cache,
            selections,
            apis,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.config.endpoints
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Fresh scope for files that only live for one command run
    pub fn scope(&self) -> ScopedResources {
        ScopedResources::new(self.cache.clone())
    }

    /// Track a choice-offering message so replies to it reach the resolver
    pub async fn register_selection(
        &self,
        message_id: &str,
        owner_id: &str,
        kind: SelectionKind,
        payload: SelectionPayload,
        resources: Vec<ResourceHandle>,
    ) {
        let selection = PendingSelection::new(message_id, owner_id, kind, payload, resources);
        self.selections.create(selection).await;
    }
}

/// Transient "please wait" message, removed once the real answer is ready
pub struct WaitNotice<'a> {
    sink: &'a dyn ReplySink,
    message_id: Option<String>,
}

impl<'a> WaitNotice<'a> {
    pub async fn post(sink: &'a dyn ReplySink, text: &str) -> WaitNotice<'a> {
        let message_id = match sink.send(OutboundReply::text(text)).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to send wait notice: {}", e);
                None
            }
        };
        Self { sink, message_id }
    }

    pub async fn clear(mut self) {
        if let Some(id) = self.message_id.take() {
            if let Err(e) = self.sink.delete(&id).await {
                warn!("Failed to delete wait notice {}: {}", id, e);
            }
        }
    }
}

/// Lookup table for commands plus the selection resolver
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    index: HashMap<String, usize>,
    resolver: SelectionResolver,
    prefix: String,
}

impl CommandRegistry {
    pub fn new(services: Arc<Services>) -> Self {
        let resolver = SelectionResolver::new(services.selections.clone(), services.cache.clone());
        Self {
            commands: Vec::new(),
            index: HashMap::new(),
            resolver,
            prefix: services.prefix().to_string(),
        }
    }

    /// Registry with every built-in command and selection handler
    pub fn with_defaults(services: Arc<Services>) -> Self {
        let mut registry = Self::new(services.clone());

        for command in chat::commands(services.clone()) {
            registry.register(command);
        }
        for command in youtube::commands(services.clone()) {
            registry.register(command);
        }
        for command in midjourney::commands(services.clone()) {
            registry.register(command);
        }
        for command in imagegen::commands(services.clone()) {
            registry.register(command);
        }
        registry.register(Arc::new(upscale::UpscaleCommand::new(services.clone())));
        registry.register(Arc::new(lyrics::LyricsCommand::new(services.clone())));
        registry.register(Arc::new(cosplay::CosplayCommand::new(services.clone())));
        registry.register(Arc::new(goatstor::GoatStorCommand::new(services.clone())));

        for (kind, handler) in chat::handlers(services.clone())
            .into_iter()
            .chain(youtube::handlers(services.clone()))
            .chain(midjourney::handlers(services.clone()))
            .chain(imagegen::handlers(services))
        {
            registry.register_handler(kind, handler);
        }

        registry
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        let slot = self.commands.len();
        self.index.insert(command.name().to_lowercase(), slot);
        for alias in command.aliases() {
            self.index.insert(alias.to_lowercase(), slot);
        }
        self.commands.push(command);
    }

    pub fn register_handler(&mut self, kind: SelectionKind, handler: Arc<dyn SelectionHandler>) {
        self.resolver.register(kind, handler);
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.index.get(&name.to_lowercase()).map(|&i| &self.commands[i])
    }

    /// Known command names and aliases (lowercase), plus `help`
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.keys().cloned().collect();
        names.push("help".to_string());
        names.sort();
        names
    }

    pub fn resolver(&self) -> &SelectionResolver {
        &self.resolver
    }

    /// Run a command. Failures are answered with exactly one message.
    /// Returns false when no such command exists.
    pub async fn dispatch(&self, invocation: &Invocation, sink: &dyn ReplySink) -> bool {
        if invocation.command == "help" {
            if let Err(e) = sink.send(OutboundReply::text(self.help_text())).await {
                warn!("Failed to send help: {}", e);
            }
            return true;
        }

        let Some(command) = self.find(&invocation.command) else {
            return false;
        };

        info!("Executing {} for {}", command.name(), invocation.sender_id);
        if let Err(e) = command.execute(invocation, sink).await {
            match &e {
                CommandError::Internal(_) => tracing::error!("{} failed: {}", command.name(), e),
                _ => warn!("{} failed: {}", command.name(), e),
            }
            if let Err(send_err) = sink.send(OutboundReply::text(e.user_message())).await {
                warn!("Failed to report failure of {}: {}", command.name(), send_err);
            }
        }
        true
    }

    /// Hand a reply to a tracked message to the resolver
    pub async fn resolve(&self, reply: &InboundReply, sink: &dyn ReplySink) -> Outcome {
        self.resolver.resolve(reply, sink).await
    }

    pub fn help_text(&self) -> String {
        let mut lines = vec!["📜 Available commands".to_string(), String::new()];
        for command in &self.commands {
            let mut line = format!("• {}{}", self.prefix, command.name());
            if !command.usage().is_empty() {
                line.push(' ');
                line.push_str(command.usage());
            }
            lines.push(line);
            lines.push(format!("   {}", command.description()));
            if !command.aliases().is_empty() {
                lines.push(format!("   aka {}", command.aliases().join(", ")));
            }
        }
        lines.join("\n")
    }
}

/// Prompt from the arguments, or an input error with `missing` as wording
pub(crate) fn require_prompt(invocation: &Invocation, missing: &str) -> Result<String, CommandError> {
    let prompt = invocation.text();
    if prompt.is_empty() {
        Err(CommandError::user_input(missing))
    } else {
        Ok(prompt)
    }
}

/// Current time line used in list headers
pub(crate) fn timestamp_line() -> String {
    format!(" • 📅 {}", chrono::Utc::now().format("%B %-d, %Y %-I:%M %p UTC"))
}

/// Test fixtures shared by the command modules
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::selection::InMemorySelectionStore;
    use std::time::Duration;
    use tempfile::TempDir;

    pub struct Fixture {
        pub services: Arc<Services>,
        pub store: Arc<InMemorySelectionStore>,
        pub _temp: TempDir,
    }

    pub async fn fixture(base_url: &str) -> Fixture {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let fetch = FetchClient::new();
        let cache = ResourceCache::open(temp.path(), fetch.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        let store = Arc::new(InMemorySelectionStore::new(cache.clone(), None));
        let config = Config {
            cache_dir: temp.path().to_path_buf(),
            endpoints: Endpoints::all_at(base_url),
            ..Config::default()
        };
        let services = Arc::new(Services::new(Arc::new(config), fetch, cache, store.clone()));
        Fixture {
            services,
            store,
            _temp: temp,
        }
    }

    /// Four-byte PNG-ish body; only used where nothing decodes it
    pub const FAKE_IMAGE: &[u8] = b"\x89PNG";

    /// Encoded 8×8 PNG for paths that decode images
    pub fn png_bytes(color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba(color));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }
}
