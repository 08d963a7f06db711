//! GoatStor command marketplace client

use super::{Command, Services};
use crate::channels::{Invocation, OutboundReply, ReplySink};
use crate::error::CommandError;
use crate::fetch::{Endpoint, FetchError, RequestParams};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const PAGE_SIZE: u64 = 5;
const TIMEOUT: Duration = Duration::from_secs(20);

fn boxed(content: &str) -> String {
    format!("╭───『 🐐 GoatStor 』───╮\n{}\n╰──────────────╯", content)
}

/// Display a JSON field, `fallback` when absent
fn field(item: &Value, key: &str, fallback: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Marketplace sub-commands
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Show(u64),
    Page(u64),
    Search(String),
    Trending,
    Status,
    Like(u64),
}

impl Action {
    fn parse(args: &[String]) -> Result<Option<Self>, CommandError> {
        let Some(sub) = args.first() else {
            return Ok(None);
        };
        let id = || {
            args.get(1)
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| CommandError::user_input(boxed("⚠️ Invalid ID.")))
        };

        let action = match sub.to_lowercase().as_str() {
            "show" => Self::Show(id()?),
            "like" => Self::Like(id()?),
            "page" => {
                let page = match args.get(1) {
                    None => 1,
                    Some(raw) => raw.parse::<i64>().unwrap_or(1),
                };
                if page <= 0 {
                    return Err(CommandError::user_input(boxed("⚠️ Invalid page.")));
                }
                Self::Page(page as u64)
            }
            "search" => {
                let query = args[1..].join(" ").trim().to_string();
                if query.is_empty() {
                    return Err(CommandError::user_input(boxed("⚠️ A search query is required.")));
                }
                Self::Search(query)
            }
            "trending" => Self::Trending,
            "status" => Self::Status,
            _ => return Err(CommandError::user_input(boxed("⚠️ Unknown sub-command."))),
        };
        Ok(Some(action))
    }

    /// Verb used in failure messages
    fn verb(&self) -> &'static str {
        match self {
            Self::Show(_) => "fetch the command",
            Self::Page(_) => "browse the commands",
            Self::Search(_) => "search",
            Self::Trending => "fetch trending commands",
            Self::Status => "fetch the stats",
            Self::Like(_) => "like the command",
        }
    }
}

/// `goatstor <show|page|search|trending|status|like>`
pub struct GoatStorCommand {
    services: Arc<Services>,
}

impl GoatStorCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn base(&self) -> &str {
        self.services.endpoints().goatstor.trim_end_matches('/')
    }

    fn help(&self) -> String {
        let p = self.services.prefix();
        boxed(&format!(
            "📋 Available commands:\n\n📦 {p}goatstor show <ID>\n📄 {p}goatstor page <number>\n🔍 {p}goatstor search <query>\n🔥 {p}goatstor trending\n📊 {p}goatstor status\n💝 {p}goatstor like <ID>\n\n💡 Example: {p}goatstor show 1",
            p = p
        ))
    }

    async fn get(&self, path: &str, params: RequestParams) -> Result<Value, FetchError> {
        let endpoint = Endpoint::get(format!("{}{}", self.base(), path), TIMEOUT);
        self.services.fetch.json(&endpoint, &params).await
    }

    fn list_line(index: u64, item: &Value) -> String {
        format!(
            "{}. 📦 {} (ID: {})\n👀 {} | 💝 {} | 👨‍💻 {}",
            index,
            field(item, "itemName", "?"),
            field(item, "itemID", "?"),
            field(item, "views", "0"),
            field(item, "likes", "0"),
            field(item, "authorName", "Unknown")
        )
    }

    async fn run(&self, action: &Action) -> Result<String, FetchError> {
        match action {
            Action::Show(id) => {
                let item = self.get(&format!("/api/item/{}", id), RequestParams::None).await?;
                Ok(format!(
                    "🤖 ❲ GoatStor ❳ 🤖\n━━━━━━━━━━━━━━━\n📦 Name: {}\n🆔 ID: {}\n⚙️ Type: {}\n📝 Description: {}\n👨‍💻 Author: {}\n👀 Views: {}\n💝 Likes: {}\n🔗 Link: {}/raw/{}\n━━━━━━━━━━━━━━━",
                    field(&item, "itemName", "?"),
                    field(&item, "itemID", "?"),
                    field(&item, "type", "Unknown"),
                    field(&item, "description", ""),
                    field(&item, "authorName", "Unknown"),
                    field(&item, "views", "0"),
                    field(&item, "likes", "0"),
                    self.base(),
                    field(&item, "rawID", "")
                ))
            }

            Action::Page(page) => {
                let params = RequestParams::query([("page", page.to_string()), ("limit", PAGE_SIZE.to_string())]);
                let data = self.get("/api/items", params).await?;
                let items = data.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
                if items.is_empty() {
                    return Ok(boxed("📭 No results."));
                }
                let total = data.get("total").and_then(Value::as_u64).unwrap_or(items.len() as u64);
                let pages = total.div_ceil(PAGE_SIZE).max(1);
                let list = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::list_line((page - 1) * PAGE_SIZE + i as u64 + 1, item))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Ok(boxed(&format!("📄 Page {}/{}\n\n{}", page, pages, list)))
            }

            Action::Search(query) => {
                let data = self
                    .get("/api/items", RequestParams::query([("search", query.as_str())]))
                    .await?;
                let items = data.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
                if items.is_empty() {
                    return Ok(boxed(&format!("❌ No results for \"{}\"", query)));
                }
                let list = items
                    .iter()
                    .take(PAGE_SIZE as usize)
                    .enumerate()
                    .map(|(i, item)| Self::list_line(i as u64 + 1, item))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Ok(boxed(&format!("🔍 \"{}\"\n\n{}", query, list)))
            }

            Action::Trending => {
                let data = self.get("/api/trending", RequestParams::None).await?;
                let items = data
                    .as_array()
                    .ok_or_else(|| FetchError::malformed("trending is not a list"))?;
                let list = items
                    .iter()
                    .take(PAGE_SIZE as usize)
                    .enumerate()
                    .map(|(i, item)| {
                        format!(
                            "{}. 🔥 {}\n💝 {} | 👀 {}",
                            i + 1,
                            field(item, "itemName", "?"),
                            field(item, "likes", "0"),
                            field(item, "views", "0")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Ok(boxed(&list))
            }

            Action::Status => {
                let data = self.get("/api/stats", RequestParams::None).await?;
                let uptime = data.pointer("/hosting/uptime").cloned().unwrap_or(Value::Null);
                let top = data
                    .pointer("/topAuthors/0/_id")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                Ok(boxed(&format!(
                    "📊 GoatStor statistics\n\n📦 Commands: {}\n💝 Likes: {}\n👥 Daily users: {}\n⏰ Uptime: {}d {}h\n\n🌟 Top author: {}",
                    field(&data, "totalCommands", "0"),
                    field(&data, "totalLikes", "0"),
                    field(&data, "dailyActiveUsers", "0"),
                    field(&uptime, "days", "0"),
                    field(&uptime, "hours", "0"),
                    top
                )))
            }

            Action::Like(id) => {
                let endpoint = Endpoint::post(format!("{}/api/items/{}/like", self.base(), id), TIMEOUT);
                let data: Value = self.services.fetch.json(&endpoint, &RequestParams::None).await?;
                Ok(boxed(&format!(
                    "💝 Like added successfully\nTotal likes: {}",
                    field(&data, "likes", "?")
                )))
            }
        }
    }

    fn describe_failure(&self, err: &FetchError, action: &Action) -> String {
        match err {
            FetchError::ClientError(404) => boxed("❌ Resource not found."),
            FetchError::ServerError(500) => boxed("⚠️ Server error."),
            FetchError::NetworkUnreachable(_) => boxed(&format!("🔌 Unable to reach GoatStor\n{}", self.base())),
            other => boxed(&format!("❌ Unable to {}\nReason: {}", action.verb(), other.hint())),
        }
    }
}

#[async_trait]
impl Command for GoatStorCommand {
    fn name(&self) -> &'static str {
        "goatstor"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["gs", "market"]
    }

    fn description(&self) -> &'static str {
        "🐐 GoatStor command marketplace"
    }

    fn usage(&self) -> &'static str {
        "<show|page|search|trending|status|like>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let Some(action) = Action::parse(&invocation.args)? else {
            sink.send(OutboundReply::text(self.help())).await?;
            return Ok(());
        };

        // remote failures are part of the marketplace conversation, not command failures
        let body = match self.run(&action).await {
            Ok(body) => body,
            Err(e) => {
                warn!("GoatStor {:?} failed: {}", action, e);
                self.describe_failure(&e, &action)
            }
        };
        sink.send(OutboundReply::text(body)).await?;
        Ok(())
    }
}
