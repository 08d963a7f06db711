//! Host-independent bot runtime
//!
//! Wires configuration, resource cache, selection store, command registry and
//! router together. Both the Telegram integration and the console mode feed
//! messages through [`App::handle`].

use crate::channels::{InboundReply, Invocation, ReplyContext, ReplySink};
use crate::commands::{CommandRegistry, Services};
use crate::config::Config;
use crate::fetch::FetchClient;
use crate::resources::ResourceCache;
use crate::router::{MessageRouter, Route};
use crate::selection::{InMemorySelectionStore, Outcome, PendingSelectionStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One inbound text message as seen by the host
#[derive(Debug, Clone, Default)]
pub struct IncomingText {
    pub text: String,
    pub sender_id: String,
    pub chat_id: String,
    /// ID of the message this one replies to
    pub replied_to: Option<String>,
    /// Content of the replied-to message
    pub reply_context: Option<ReplyContext>,
}

/// What [`App::handle`] did with a message
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Command(String),
    UnknownCommand,
    Selection(Outcome),
    Nothing,
}

pub struct App {
    services: Arc<Services>,
    registry: CommandRegistry,
    router: MessageRouter,
}

impl App {
    /// Build the runtime from configuration
    pub async fn open(config: Config) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let fetch = FetchClient::new();
        let cache = ResourceCache::open(&config.cache_dir, fetch.clone(), config.download_timeout)
            .await
            .with_context(|| format!("Failed to open cache dir {}", config.cache_dir.display()))?;
        let store: Arc<dyn PendingSelectionStore> =
            Arc::new(InMemorySelectionStore::new(cache.clone(), config.selection_ttl));

        let services = Arc::new(Services::new(config, fetch, cache, store));
        Self::with_services(services)
    }

    pub fn with_services(services: Arc<Services>) -> Result<Arc<Self>> {
        let registry = CommandRegistry::with_defaults(services.clone());
        let router = MessageRouter::new(services.prefix(), registry.names()).context("Invalid command prefix")?;
        info!(
            "Loaded {} command names, prefix {:?}",
            registry.names().len(),
            services.prefix()
        );
        Ok(Arc::new(Self {
            services,
            registry,
            router,
        }))
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Route and process one message
    pub async fn handle(&self, message: IncomingText, sink: &dyn ReplySink) -> Handled {
        let tracked = match &message.replied_to {
            Some(id) => self.registry.resolver().is_tracked(id).await,
            None => false,
        };

        match self.router.route(&message.text, tracked) {
            Route::Command { name, args } => {
                let invocation = Invocation {
                    command: name.clone(),
                    args,
                    sender_id: message.sender_id,
                    chat_id: message.chat_id,
                    reply_context: message.reply_context,
                };
                if self.registry.dispatch(&invocation, sink).await {
                    Handled::Command(name)
                } else {
                    Handled::UnknownCommand
                }
            }
            Route::Reply => {
                let Some(replied_to) = message.replied_to.as_deref() else {
                    return Handled::Nothing;
                };
                let inbound = InboundReply::new(replied_to, &message.sender_id, &message.text);
                let outcome = self.registry.resolve(&inbound, sink).await;
                debug!("Reply to {} -> {:?}", replied_to, outcome);
                Handled::Selection(outcome)
            }
            Route::Other => Handled::Nothing,
        }
    }

    /// Periodically drop expired selections until the runtime shuts down
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let app = Arc::clone(self);
        let every = app.services.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = app.services.selections.purge_expired().await;
                if purged > 0 {
                    info!("Purged {} expired selections", purged);
                }
            }
        })
    }
}
