//! Midjourney commands
//!
//! `midjourney` delivers four separate images and lets the user pick one with
//! `U1..U4`/`V1..V4`. `midjourney3` delivers a single 2×2 grid backed by a
//! remote task: a number crops a quadrant locally, an action label (or
//! `REROLL`) runs a remote action and moves the conversation to the new grid.

use super::{require_prompt, Command, Services, WaitNotice};
use crate::channels::{InboundReply, Invocation, OutboundReply, ReplySink};
use crate::error::{CommandError, ReportExt};
use crate::fetch::{require, Endpoint, FetchError, RequestParams};
use crate::imaging;
use crate::resources::{ResourceHandle, ScopedResources};
use crate::selection::{
    grid_slot, FailurePolicy, Grammar, PendingSelection, ReplyChoice, Resolution, SelectionHandler, SelectionKind,
    SelectionPayload, TaskAction,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
const REROLL: &str = "REROLL";

#[derive(Debug, Deserialize)]
struct GridResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    results: Vec<String>,
}

/// Reuse a file the entry still owns, otherwise fetch `url` into `scope`
async fn owned_or_fetch(
    services: &Services,
    owned: Option<&ResourceHandle>,
    url: &str,
    name: &str,
    scope: &mut ScopedResources,
) -> Result<ResourceHandle, CommandError> {
    if let Some(handle) = owned.filter(|h| services.cache.is_live(h)) {
        return Ok(handle.clone());
    }
    debug!("Re-downloading {} for selection", url);
    Ok(scope
        .materialize_with_timeout(url, name, services.config.download_timeout)
        .await?)
}

/// `midjourney <prompt>`
pub struct MidjourneyCommand {
    services: Arc<Services>,
}

impl MidjourneyCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn generate(&self, prompt: &str, scope: &mut ScopedResources) -> Result<Vec<String>, CommandError> {
        let endpoint = Endpoint::get(&self.services.endpoints().midjourney, GENERATION_TIMEOUT);
        let params = RequestParams::query([("prompt", prompt), ("usepolling", "false")]);
        let grid: GridResponse = self.services.fetch.json(&endpoint, &params).await?;

        if grid.status.as_deref() == Some("failed") || grid.results.len() < 4 {
            let reason = grid.message.unwrap_or_else(|| "fewer than four images".to_string());
            return Err(FetchError::malformed(reason).into());
        }

        let urls: Vec<String> = grid.results.into_iter().take(4).collect();
        for (i, url) in urls.iter().enumerate() {
            scope
                .materialize_with_timeout(url, &format!("mj_{}.jpg", i + 1), self.services.config.download_timeout)
                .await?;
        }
        Ok(urls)
    }
}

#[async_trait]
impl Command for MidjourneyCommand {
    fn name(&self) -> &'static str {
        "midjourney"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mj"]
    }

    fn description(&self) -> &'static str {
        "Generate four Midjourney images and pick one"
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = require_prompt(invocation, "❌ Please provide a prompt to generate an image.")?;

        let notice = WaitNotice::post(sink, "⏳ Generating Midjourney images, please wait...").await;
        let mut scope = self.services.scope();
        let result = self.generate(&prompt, &mut scope).await;
        notice.clear().await;
        let urls = result.report("❌ Image generation failed.")?;

        let body = "✨ Midjourney images generated\nReply with U1–U4 or V1–V4 to select an image.";
        let message_id = sink
            .send(OutboundReply::text(body).with_attachments(scope.handles().to_vec()))
            .await?;

        let images = scope.detach_all();
        self.services
            .register_selection(
                &message_id,
                &invocation.sender_id,
                SelectionKind::MidjourneyGrid,
                SelectionPayload::ImageGrid { image_urls: urls },
                images,
            )
            .await;
        Ok(())
    }
}

/// Pick one image of a `midjourney` set
pub struct MidjourneyGridHandler {
    services: Arc<Services>,
}

#[async_trait]
impl SelectionHandler for MidjourneyGridHandler {
    fn grammar(&self, _selection: &PendingSelection) -> Grammar {
        Grammar::grid_tokens(true, true, true)
    }

    async fn resolve(
        &self,
        selection: &PendingSelection,
        choice: ReplyChoice,
        _reply: &InboundReply,
        scope: &mut ScopedResources,
        sink: &dyn ReplySink,
    ) -> Result<Resolution, CommandError> {
        let SelectionPayload::ImageGrid { image_urls } = &selection.payload else {
            return Err(CommandError::internal("midjourney grid without image payload"));
        };
        let ReplyChoice::Action(token) = choice else {
            return Err(CommandError::internal("midjourney grid expects a token"));
        };
        let (_, slot) = grid_slot(&token).ok_or_else(|| CommandError::internal(format!("bad token {}", token)))?;
        let url = image_urls
            .get(slot)
            .ok_or_else(|| CommandError::internal(format!("slot {} outside {} images", slot, image_urls.len())))?;

        let owned = selection.resources.get(slot).filter(|h| self.services.cache.is_live(h));
        let image = match owned {
            Some(handle) => handle.clone(),
            None => {
                let notice = WaitNotice::post(sink, "⏳ Downloading selected image...").await;
                let fetched = owned_or_fetch(&self.services, None, url, &format!("mj_{}.jpg", slot + 1), scope).await;
                notice.clear().await;
                fetched.report("❌ Failed to retrieve selected image.")?
            }
        };

        Ok(Resolution::done(
            OutboundReply::text("✨ Here is your selected image").with_attachment(image),
        ))
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Remove
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskButton {
    #[serde(default)]
    label: String,
    #[serde(default)]
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    buttons: Option<Vec<TaskButton>>,
}

/// A remote task's current grid
struct TaskState {
    task_id: String,
    grid_url: String,
    actions: Vec<TaskAction>,
}

impl TaskResponse {
    fn into_state(self) -> Result<TaskState, FetchError> {
        let grid_url = require(self.image_url.filter(|u| !u.is_empty()), "imageUrl")?;
        let task_id = match require(self.id, "id")? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let actions = self
            .buttons
            .unwrap_or_default()
            .into_iter()
            .filter(|b| !b.label.trim().is_empty())
            .map(|b| TaskAction::new(b.label.trim(), b.custom_id.as_deref()))
            .collect();
        Ok(TaskState {
            task_id,
            grid_url,
            actions,
        })
    }
}

fn task_body(prompt: &str, task_id: &str) -> String {
    format!(
        "━━━━━━━━━━━━━━━\n🧠 Prompt: {}\n• taskID: {}\n\nReply with:\n1–4 → Select image\nU1–U4 / V1–V4 / REROLL\n━━━━━━━━━━━━━━━",
        prompt, task_id
    )
}

/// `midjourney3 <prompt>`
pub struct Midjourney3Command {
    services: Arc<Services>,
}

impl Midjourney3Command {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn start(&self, prompt: &str, scope: &mut ScopedResources) -> Result<(TaskState, ResourceHandle), CommandError> {
        let endpoint = Endpoint::get(
            format!("{}/midjourneyv", self.services.endpoints().midjourney_task),
            GENERATION_TIMEOUT,
        );
        let response: TaskResponse = self
            .services
            .fetch
            .json(&endpoint, &RequestParams::query([("prompt", prompt)]))
            .await?;
        let state = response.into_state()?;
        let grid = scope
            .materialize_with_timeout(
                &state.grid_url,
                &format!("mj_grid_{}.png", state.task_id),
                self.services.config.download_timeout,
            )
            .await?;
        Ok((state, grid))
    }
}

#[async_trait]
impl Command for Midjourney3Command {
    fn name(&self) -> &'static str {
        "midjourney3"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mj3"]
    }

    fn description(&self) -> &'static str {
        "Generate a Midjourney grid with follow-up actions"
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = require_prompt(invocation, "❌ | Please provide a prompt.")?;

        let notice = WaitNotice::post(sink, "⏳ Mj Process started.. please wait!").await;
        let mut scope = self.services.scope();
        let result = self.start(&prompt, &mut scope).await;
        notice.clear().await;
        let (state, grid) = result.report("❌ | MidJourney generation failed.")?;

        let message_id = sink
            .send(OutboundReply::text(task_body(&prompt, &state.task_id)).with_attachment(grid.clone()))
            .await?;

        scope.detach(&grid);
        self.services
            .register_selection(
                &message_id,
                &invocation.sender_id,
                SelectionKind::MidjourneyTask,
                SelectionPayload::RemoteTask {
                    task_id: state.task_id,
                    actions: state.actions,
                    prompt,
                    grid_url: state.grid_url,
                },
                vec![grid],
            )
            .await;
        Ok(())
    }
}

/// Crops and remote actions on a `midjourney3` grid
pub struct MidjourneyTaskHandler {
    services: Arc<Services>,
}

impl MidjourneyTaskHandler {
    async fn crop(
        &self,
        selection: &PendingSelection,
        task_id: &str,
        grid_url: &str,
        index: usize,
        scope: &mut ScopedResources,
    ) -> Result<Resolution, CommandError> {
        let grid = owned_or_fetch(
            &self.services,
            selection.resources.first(),
            grid_url,
            &format!("mj_src_{}.png", task_id),
            scope,
        )
        .await?;
        let out = scope.allocate(&format!("mj_crop_{}_{}.png", task_id, index + 1));
        imaging::crop_quadrant(grid.path().to_path_buf(), index, out.path().to_path_buf()).await?;

        Ok(Resolution::stay(
            OutboundReply::text(format!("✅ Selected image {}", index + 1)).with_attachment(out),
        ))
    }

    async fn act(
        &self,
        task_id: &str,
        custom_id: Option<&str>,
        scope: &mut ScopedResources,
    ) -> Result<(TaskState, ResourceHandle), CommandError> {
        let endpoint = Endpoint::get(
            format!("{}/action", self.services.endpoints().midjourney_task),
            GENERATION_TIMEOUT,
        );
        let mut params = vec![("taskID".to_string(), task_id.to_string())];
        if let Some(cid) = custom_id {
            params.push(("cID".to_string(), cid.to_string()));
        }
        let response: TaskResponse = self.services.fetch.json(&endpoint, &RequestParams::Query(params)).await?;
        let state = response.into_state()?;
        let grid = scope
            .materialize_with_timeout(
                &state.grid_url,
                &format!("mj_action_{}.png", state.task_id),
                self.services.config.download_timeout,
            )
            .await?;
        Ok((state, grid))
    }
}

/// Action a reply token refers to; `REROLL` falls back to the reroll button
fn find_action<'a>(actions: &'a [TaskAction], token: &str) -> Option<&'a TaskAction> {
    actions
        .iter()
        .find(|a| a.label.to_uppercase() == token)
        .or_else(|| {
            if token != REROLL {
                return None;
            }
            actions
                .iter()
                .find(|a| a.label.to_uppercase().contains(REROLL) || a.label.contains('🔄'))
        })
}

#[async_trait]
impl SelectionHandler for MidjourneyTaskHandler {
    fn grammar(&self, selection: &PendingSelection) -> Grammar {
        let actions = match &selection.payload {
            SelectionPayload::RemoteTask { actions, .. } => actions.iter().map(|a| a.label.clone()).collect(),
            _ => Vec::new(),
        };
        Grammar::IndexOrActions {
            count: 4,
            actions,
            extra: vec![REROLL.to_string()],
        }
    }

    async fn resolve(
        &self,
        selection: &PendingSelection,
        choice: ReplyChoice,
        _reply: &InboundReply,
        scope: &mut ScopedResources,
        sink: &dyn ReplySink,
    ) -> Result<Resolution, CommandError> {
        let SelectionPayload::RemoteTask {
            task_id,
            actions,
            prompt,
            grid_url,
        } = &selection.payload
        else {
            return Err(CommandError::internal("midjourney task without task payload"));
        };

        let token = match choice {
            ReplyChoice::Index(i) => {
                return self
                    .crop(selection, task_id, grid_url, i, scope)
                    .await
                    .report("❌ Action failed.");
            }
            ReplyChoice::Action(token) => token,
            other => return Err(CommandError::internal(format!("unexpected choice {:?}", other))),
        };

        let custom_id = find_action(actions, &token).and_then(|a| a.custom_id.clone());
        let notice = WaitNotice::post(sink, &format!("🔄 Processing {}...", token)).await;
        let result = self.act(task_id, custom_id.as_deref(), scope).await;
        notice.clear().await;
        let (state, grid) = result.report("❌ Action failed.")?;

        let reply = OutboundReply::text(format!(
            "✅ Action completed: {}\nReply again with 1–4 or another action.",
            token
        ))
        .with_attachment(grid.clone());

        Ok(Resolution::continue_with(
            reply,
            SelectionPayload::RemoteTask {
                task_id: state.task_id,
                actions: state.actions,
                prompt: prompt.clone(),
                grid_url: state.grid_url,
            },
            vec![grid],
        ))
    }
}

pub fn commands(services: Arc<Services>) -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(MidjourneyCommand::new(services.clone())),
        Arc::new(Midjourney3Command::new(services)),
    ]
}

pub fn handlers(services: Arc<Services>) -> Vec<(SelectionKind, Arc<dyn SelectionHandler>)> {
    vec![
        (
            SelectionKind::MidjourneyGrid,
            Arc::new(MidjourneyGridHandler {
                services: services.clone(),
            }) as Arc<dyn SelectionHandler>,
        ),
        (SelectionKind::MidjourneyTask, Arc::new(MidjourneyTaskHandler { services })),
    ]
}
