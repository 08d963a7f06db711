//! Image generation commands
//!
//! `flux1nm` and `metagen` compose four results into one grid image and track
//! it as a selection. The rest return a single image.

use super::{require_prompt, timestamp_line, Command, Services, WaitNotice};
use crate::channels::{InboundReply, Invocation, OutboundReply, ReplySink};
use crate::config::Endpoints;
use crate::error::{CommandError, ReportExt};
use crate::fetch::{require, Endpoint, FetchError, RequestParams};
use crate::imaging::{self, GridLayout};
use crate::resources::{ResourceHandle, ScopedResources};
use crate::selection::{
    grid_slot, FailurePolicy, Grammar, PendingSelection, ReplyChoice, Resolution, SelectionHandler, SelectionKind,
    SelectionPayload,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const LINE: &str = "━━━━━━━━━━━━━━━";

/// Download `urls` into `scope` and compose them into a grid; returns the grid
async fn build_grid(
    services: &Services,
    urls: &[String],
    prefix: &str,
    layout: GridLayout,
    scope: &mut ScopedResources,
) -> Result<ResourceHandle, CommandError> {
    let mut paths = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        let handle = scope
            .materialize_with_timeout(url, &format!("{}_{}.png", prefix, i + 1), services.config.download_timeout)
            .await?;
        paths.push(handle.path().to_path_buf());
    }
    let grid = scope.allocate(&format!("{}_grid.png", prefix));
    imaging::compose_grid(paths, layout, grid.path().to_path_buf()).await?;
    Ok(grid)
}

/// Send a grid and track it; the source images stay with the selection
#[allow(clippy::too_many_arguments)]
async fn offer_grid(
    services: &Services,
    invocation: &Invocation,
    sink: &dyn ReplySink,
    kind: SelectionKind,
    body: String,
    urls: Vec<String>,
    grid: ResourceHandle,
    mut scope: ScopedResources,
) -> Result<(), CommandError> {
    let message_id = sink.send(OutboundReply::text(body).with_attachment(grid.clone())).await?;

    let sources: Vec<ResourceHandle> = scope.handles().iter().filter(|h| **h != grid).cloned().collect();
    for handle in &sources {
        scope.detach(handle);
    }
    scope.release().await;

    services
        .register_selection(
            &message_id,
            &invocation.sender_id,
            kind,
            SelectionPayload::ImageGrid { image_urls: urls },
            sources,
        )
        .await;
    Ok(())
}

/// Entry-owned copy of image `slot`, or a fresh download into `scope`
async fn grid_image(
    services: &Services,
    selection: &PendingSelection,
    urls: &[String],
    slot: usize,
    scope: &mut ScopedResources,
) -> Result<ResourceHandle, CommandError> {
    if let Some(handle) = selection.resources.get(slot).filter(|h| services.cache.is_live(h)) {
        return Ok(handle.clone());
    }
    let url = urls
        .get(slot)
        .ok_or_else(|| CommandError::internal(format!("slot {} outside {} images", slot, urls.len())))?;
    Ok(scope
        .materialize_with_timeout(url, &format!("selected_{}.png", slot + 1), services.config.download_timeout)
        .await?)
}

#[derive(Debug, Deserialize)]
struct FluxImage {
    image_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FluxResponse {
    #[serde(default)]
    images: Vec<FluxImage>,
}

/// `flux1nm <prompt>`
pub struct FluxCommand {
    services: Arc<Services>,
}

impl FluxCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn generate(&self, prompt: &str, scope: &mut ScopedResources) -> Result<(Vec<String>, ResourceHandle), CommandError> {
        let endpoint = Endpoint::get(&self.services.endpoints().flux, Duration::from_secs(120));
        let response: FluxResponse = self
            .services
            .fetch
            .json(&endpoint, &RequestParams::query([("prompt", prompt)]))
            .await?;
        if response.images.len() != 4 {
            return Err(FetchError::malformed(format!("expected 4 images, got {}", response.images.len())).into());
        }
        let urls = response
            .images
            .into_iter()
            .map(|img| require(img.image_link, "image_link"))
            .collect::<Result<Vec<_>, _>>()?;

        let grid = build_grid(&self.services, &urls, "flux1nm", GridLayout::square(), scope).await?;
        Ok((urls, grid))
    }
}

#[async_trait]
impl Command for FluxCommand {
    fn name(&self) -> &'static str {
        "flux1nm"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["f1nm"]
    }

    fn description(&self) -> &'static str {
        "Generate four Flux 1nm images as a grid"
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = require_prompt(invocation, "❌ | Please provide a prompt.")?;

        let notice = WaitNotice::post(sink, "⚡ Flux 1nm is generating your images...").await;
        let mut scope = self.services.scope();
        let result = self.generate(&prompt, &mut scope).await;
        notice.clear().await;
        let (urls, grid) = result.report("❌ | Image generation failed.")?;

        let body = format!("{}\n❏ Reply with U1, U2, U3, or U4 to select an image\n{}", LINE, LINE);
        offer_grid(&self.services, invocation, sink, SelectionKind::FluxGrid, body, urls, grid, scope).await
    }
}

/// `U1..U4` on a flux grid
pub struct FluxGridHandler {
    services: Arc<Services>,
}

#[async_trait]
impl SelectionHandler for FluxGridHandler {
    fn grammar(&self, _selection: &PendingSelection) -> Grammar {
        Grammar::grid_tokens(true, false, false)
    }

    async fn resolve(
        &self,
        selection: &PendingSelection,
        choice: ReplyChoice,
        _reply: &InboundReply,
        scope: &mut ScopedResources,
        _sink: &dyn ReplySink,
    ) -> Result<Resolution, CommandError> {
        let SelectionPayload::ImageGrid { image_urls } = &selection.payload else {
            return Err(CommandError::internal("flux grid without image payload"));
        };
        let ReplyChoice::Action(token) = choice else {
            return Err(CommandError::internal("flux grid expects a token"));
        };
        let (_, slot) = grid_slot(&token).ok_or_else(|| CommandError::internal(format!("bad token {}", token)))?;

        let image = grid_image(&self.services, selection, image_urls, slot, scope)
            .await
            .report("❌ | Failed to retrieve the selected image.")?;
        Ok(Resolution::done(
            OutboundReply::text(format!("✅ Here is your selected image ({}) from Flux 1nm.", token))
                .with_attachment(image),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct MetaImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    images: Vec<MetaImage>,
}

/// `metagen <prompt>`
pub struct MetaGenCommand {
    services: Arc<Services>,
}

impl MetaGenCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn generate(&self, prompt: &str, scope: &mut ScopedResources) -> Result<(Vec<String>, ResourceHandle), CommandError> {
        let endpoint = Endpoint::post(&self.services.endpoints().metagen, Duration::from_secs(150));
        let body = RequestParams::Json(serde_json::json!({ "prompt": prompt }));
        let response: MetaResponse = self.services.fetch.json(&endpoint, &body).await?;
        if !response.success || response.images.len() < 4 {
            return Err(FetchError::malformed("did not return 4 images").into());
        }
        let urls = response
            .images
            .into_iter()
            .take(4)
            .map(|img| require(img.url, "url"))
            .collect::<Result<Vec<_>, _>>()?;

        let grid = build_grid(&self.services, &urls, "meta", GridLayout::padded(), scope).await?;
        Ok((urls, grid))
    }
}

#[async_trait]
impl Command for MetaGenCommand {
    fn name(&self) -> &'static str {
        "metagen"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["metaimg", "meta"]
    }

    fn description(&self) -> &'static str {
        "Generate a 4-image grid with Meta AI"
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = require_prompt(invocation, "❌ Please provide a prompt.\nExample: metagen futuristic city")?;

        let notice = WaitNotice::post(sink, "⏳ Generating Meta AI images...").await;
        let mut scope = self.services.scope();
        let result = self.generate(&prompt, &mut scope).await;
        notice.clear().await;
        let (urls, grid) = result.report("❌ Generation failed.")?;

        let body = "✨ Meta AI generated 4 images\nReply with 1, 2, 3, 4 to select an image or \"all\" to receive them all.".to_string();
        offer_grid(&self.services, invocation, sink, SelectionKind::MetaGenGrid, body, urls, grid, scope).await
    }
}

/// One image or `all` from a metagen grid
pub struct MetaGenGridHandler {
    services: Arc<Services>,
}

#[async_trait]
impl SelectionHandler for MetaGenGridHandler {
    fn grammar(&self, selection: &PendingSelection) -> Grammar {
        Grammar::IndexOrAll {
            count: selection.payload.item_count(),
        }
    }

    async fn resolve(
        &self,
        selection: &PendingSelection,
        choice: ReplyChoice,
        _reply: &InboundReply,
        scope: &mut ScopedResources,
        _sink: &dyn ReplySink,
    ) -> Result<Resolution, CommandError> {
        let SelectionPayload::ImageGrid { image_urls } = &selection.payload else {
            return Err(CommandError::internal("metagen grid without image payload"));
        };

        let (slots, body): (Vec<usize>, &str) = match choice {
            ReplyChoice::Index(i) => (vec![i], "✨ Here is your image:"),
            ReplyChoice::All => ((0..image_urls.len()).collect(), "✨ Here are all the images:"),
            other => return Err(CommandError::internal(format!("unexpected choice {:?}", other))),
        };

        let mut images = Vec::with_capacity(slots.len());
        for slot in slots {
            let image = grid_image(&self.services, selection, image_urls, slot, scope)
                .await
                .report("❌ Failed to retrieve the images.")?;
            images.push(image);
        }
        Ok(Resolution::done(OutboundReply::text(body).with_attachments(images)))
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Remove
    }
}

/// Where a single-image backend puts its result
#[derive(Debug, Clone, Copy)]
pub enum ImageSource {
    /// JSON document with the image URL at pointer `url`. When `flag` is set,
    /// the value at that pointer must be truthy or the answer counts as failed.
    Json {
        url: &'static str,
        flag: Option<&'static str>,
    },
    /// The response body is the image
    Binary,
}

impl ImageSource {
    const fn json(url: &'static str) -> Self {
        Self::Json { url, flag: None }
    }
}

/// `true`, a non-empty string or a non-zero number
fn is_set(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |n| n != 0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        Some(Value::Null) | None => false,
    }
}

/// A prompt-to-one-image backend
pub struct ImageBackend {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub url: fn(&Endpoints) -> &str,
    /// Fixed query parameters sent with every prompt
    pub extra_params: &'static [(&'static str, &'static str)],
    pub source: ImageSource,
    pub timeout: Duration,
    pub missing_prompt: &'static str,
    pub generating: &'static str,
    pub failure: &'static str,
    pub caption: fn(&str) -> String,
}

pub static IMAGE_BACKENDS: &[ImageBackend] = &[
    ImageBackend {
        id: "xl",
        aliases: &["sdxl"],
        description: "Generate an image with Stable Diffusion XL",
        url: |e| &e.xl,
        extra_params: &[],
        source: ImageSource::json("/url"),
        timeout: Duration::from_secs(120),
        missing_prompt: "❌ | Please provide a prompt.",
        generating: "🖼️ | Generating image, please wait...",
        failure: "❌ | Image generation failed.",
        caption: |p| format!("{}\n🧠 Prompt: {}\n✅ XL image generated successfully\n{}", LINE, p, LINE),
    },
    ImageBackend {
        id: "dimage",
        aliases: &[],
        description: "Generate and download an AI image",
        url: |e| &e.dimage,
        extra_params: &[],
        source: ImageSource::json("/download_url"),
        timeout: Duration::from_secs(60),
        missing_prompt: "❌ | Please enter a prompt.\nExample: dimage A cyberpunk cat in a rainy city",
        generating: "💚 | Generating your image, please wait...",
        failure: "❌ | Error generating image. Please try again later.",
        caption: |p| format!("✅ | Here's your generated image for: \"{}\"", p),
    },
    ImageBackend {
        id: "magic2",
        aliases: &[],
        description: "Generate an image with MagicStudio AI",
        url: |e| &e.magic_studio,
        extra_params: &[],
        source: ImageSource::Binary,
        timeout: Duration::from_secs(120),
        missing_prompt: "❌ | Please provide a prompt.",
        generating: "🖼️ | Generating image, please wait...",
        failure: "❌ | Image generation failed.",
        caption: |p| format!("{}\n🧠 Prompt: {}\n✨ MagicStudio image generated successfully\n{}", LINE, p, LINE),
    },
    ImageBackend {
        id: "neuralblender",
        aliases: &["neuralblend"],
        description: "Generate an image with NeuralBlender",
        url: |e| &e.neural_blender,
        extra_params: &[],
        source: ImageSource::Binary,
        timeout: Duration::from_secs(120),
        missing_prompt: "❌ | Please provide a prompt.",
        generating: "🎨 | Generating image, please wait...",
        failure: "❌ | Image generation failed.",
        caption: |p| format!("{}\n✅ Image generated successfully!\n🧠 Prompt: {}\n{}", LINE, p, LINE),
    },
    ImageBackend {
        id: "pixarai",
        aliases: &["pixar", "pxai"],
        description: "Generate an image with PixArai",
        url: |e| &e.pixarai,
        extra_params: &[],
        source: ImageSource::Json {
            url: "/result/url",
            flag: Some("/status"),
        },
        timeout: Duration::from_secs(180),
        missing_prompt: "❌ Please provide a prompt.\nExample: pixarai a cyberpunk cat",
        generating: "⏳ Generating your PixArai image...",
        failure: "❌ PixArai generation failed.",
        caption: |p| format!("🎨 PixArai Image Generated\n📝 Prompt: {}", p),
    },
    ImageBackend {
        id: "aiphoto",
        aliases: &["aigenerate", "aiimg"],
        description: "Generate an AI portrait photo",
        url: |e| &e.aiphoto,
        extra_params: &[("ratio", "4:5"), ("slug", "ai-photo-generator")],
        source: ImageSource::Json {
            url: "/imageUrl",
            flag: Some("/success"),
        },
        timeout: Duration::from_secs(120),
        missing_prompt: "Please provide a prompt for the AI image generator!",
        generating: "🖼️ Generating your AI photo...",
        failure: "❌ Error generating AI image.",
        caption: |_| format!("✦ AI Image Generated\n{}", timestamp_line()),
    },
];

/// Fetch the single image a backend produces into `scope`
async fn fetch_image(
    services: &Services,
    endpoint: &Endpoint,
    params: &RequestParams,
    source: ImageSource,
    name: &str,
    scope: &mut ScopedResources,
) -> Result<ResourceHandle, CommandError> {
    match source {
        ImageSource::Json { url: pointer, flag } => {
            let document: Value = services.fetch.json(endpoint, params).await?;
            if let Some(flag) = flag {
                if !is_set(document.pointer(flag)) {
                    return Err(FetchError::malformed(format!("backend reported failure (`{}`)", flag)).into());
                }
            }
            let url = require(
                document.pointer(pointer).and_then(Value::as_str).filter(|u| !u.is_empty()),
                pointer.trim_start_matches('/'),
            )?;
            Ok(scope
                .materialize_with_timeout(url, name, services.config.download_timeout)
                .await?)
        }
        ImageSource::Binary => {
            let raw = services.fetch.invoke(endpoint, params).await?;
            if raw.body.is_empty() {
                return Err(FetchError::malformed("empty image body").into());
            }
            Ok(scope.store_bytes(name, &raw.body).await?)
        }
    }
}

/// `xl`, `dimage`, `magic2`, `neuralblender`, `pixarai`, `aiphoto`
pub struct SingleImageCommand {
    backend: &'static ImageBackend,
    services: Arc<Services>,
}

impl SingleImageCommand {
    pub fn new(backend: &'static ImageBackend, services: Arc<Services>) -> Self {
        Self { backend, services }
    }
}

#[async_trait]
impl Command for SingleImageCommand {
    fn name(&self) -> &'static str {
        self.backend.id
    }

    fn aliases(&self) -> &'static [&'static str] {
        self.backend.aliases
    }

    fn description(&self) -> &'static str {
        self.backend.description
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = require_prompt(invocation, self.backend.missing_prompt)?;

        let notice = WaitNotice::post(sink, self.backend.generating).await;
        let mut scope = self.services.scope();
        let endpoint = Endpoint::get((self.backend.url)(self.services.endpoints()), self.backend.timeout);
        let mut params = vec![("prompt".to_string(), prompt.clone())];
        params.extend(
            self.backend
                .extra_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        let params = RequestParams::Query(params);
        let result = fetch_image(
            &self.services,
            &endpoint,
            &params,
            self.backend.source,
            &format!("{}.png", self.backend.id),
            &mut scope,
        )
        .await;
        notice.clear().await;
        let image = result.report(self.backend.failure)?;

        sink.send(OutboundReply::text((self.backend.caption)(&prompt)).with_attachment(image))
            .await?;
        scope.release().await;
        Ok(())
    }
}

/// Split `--r <ratio>` out of the arguments
fn parse_ratio(args: &[String]) -> (String, Option<String>) {
    let mut ratio = None;
    let mut words = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--r" {
            match iter.next() {
                Some(value) => ratio = Some(value.clone()),
                None => words.push(arg.clone()),
            }
        } else {
            words.push(arg.clone());
        }
    }
    (words.join(" "), ratio)
}

fn ratio_hint(ratio: &str) -> Option<&'static str> {
    match ratio {
        "9:16" => Some(", vertical portrait orientation, tall format"),
        "16:9" => Some(", horizontal landscape orientation, wide format"),
        "1:1" => Some(", square format"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct DrawResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// `fs <description> [--r <ratio>]`
pub struct FastDrawCommand {
    services: Arc<Services>,
}

impl FastDrawCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn help(&self) -> String {
        let p = self.services.prefix();
        format!(
            "🎨 FS - Imagen AI Generator\n\n💡 Usage:\n   {p}fs <description>\n   {p}fs <description> --r <ratio>\n\n📐 Ratios:\n   --r 9:16, --r 16:9, --r 1:1\n\n📝 Examples:\n   {p}fs dragon warrior\n   {p}fs anime girl --r 9:16",
            p = p
        )
    }

    async fn draw(&self, prompt: &str, scope: &mut ScopedResources) -> Result<ResourceHandle, CommandError> {
        let endpoint = Endpoint::get(&self.services.endpoints().fast_draw, Duration::from_secs(120));
        let response: DrawResponse = self
            .services
            .fetch
            .json(&endpoint, &RequestParams::query([("prompt", prompt)]))
            .await?;
        let first = response.images.into_iter().find(|u| !u.is_empty()).ok_or_else(|| {
            CommandError::user_input("❌ Generation failed\n🚫 No image generated\n🔄 Try another description")
        })?;
        Ok(scope
            .materialize_with_timeout(&first, "fs.png", self.services.config.download_timeout)
            .await?)
    }
}

#[async_trait]
impl Command for FastDrawCommand {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn description(&self) -> &'static str {
        "Create an image with Imagen AI"
    }

    fn usage(&self) -> &'static str {
        "<description> [--r 9:16|16:9|1:1]"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let raw = invocation.text();
        if raw.is_empty() {
            return Err(CommandError::user_input(format!(
                "⚠️ Please provide a description.\nExample: {}fs cyberpunk robot --r 9:16",
                self.services.prefix()
            )));
        }
        if raw.eq_ignore_ascii_case("help") || raw.eq_ignore_ascii_case("--help") {
            sink.send(OutboundReply::text(self.help())).await?;
            return Ok(());
        }

        let (mut prompt, ratio) = parse_ratio(&invocation.args);
        if let Some(hint) = ratio.as_deref().and_then(ratio_hint) {
            prompt.push_str(hint);
        }
        let ratio_line = ratio.as_deref().map(|r| format!("\n📐 Ratio: {}", r)).unwrap_or_default();

        let notice = WaitNotice::post(
            sink,
            &format!("✦ 🎨 Generating your image...\n⏳ Please wait...{}\n{}", ratio_line, timestamp_line()),
        )
        .await;
        let mut scope = self.services.scope();
        let result = self.draw(&prompt, &mut scope).await;
        notice.clear().await;
        let image = result.report("❌ Unable to generate the image right now.\n🔄 Try again later.")?;

        let ratio_msg = ratio.as_deref().map(|r| format!(" 📐 Ratio: {}", r)).unwrap_or_default();
        sink.send(
            OutboundReply::text(format!("✅ Image created successfully!{}\n🤖 Powered by Imagen AI", ratio_msg))
                .with_attachment(image),
        )
        .await?;
        scope.release().await;
        Ok(())
    }
}

/// `edit <prompt>`, optionally replying to a photo
pub struct EditCommand {
    services: Arc<Services>,
}

impl EditCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Command for EditCommand {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn description(&self) -> &'static str {
        "Generate an image, or edit the photo you reply to"
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = require_prompt(
            invocation,
            &format!(
                "❌ Please provide a prompt.\nExample: {}edit a cyberpunk city",
                self.services.prefix()
            ),
        )?;
        let photo = invocation.reply_context.as_ref().and_then(|c| c.first_photo()).cloned();

        let notice = WaitNotice::post(sink, "⏳ Processing your image...").await;
        let mut scope = self.services.scope();
        let result: Result<ResourceHandle, CommandError> = async {
            let base = self
                .services
                .apis
                .resolve(&self.services.endpoints().edit_directory, "renz")
                .await?;

            let mut params = vec![("prompt".to_string(), prompt.clone())];
            match &photo {
                Some(photo) => {
                    params.push(("ref".to_string(), photo.url.clone()));
                    if let (Some(w), Some(h)) = (photo.width, photo.height) {
                        params.push(("width".to_string(), w.to_string()));
                        params.push(("height".to_string(), h.to_string()));
                    }
                }
                None => {
                    params.push(("width".to_string(), "512".to_string()));
                    params.push(("height".to_string(), "512".to_string()));
                }
            }

            let endpoint = Endpoint::get(format!("{}/api/gptimage", base), Duration::from_secs(120));
            fetch_image(
                &self.services,
                &endpoint,
                &RequestParams::Query(params),
                ImageSource::Binary,
                "edit.png",
                &mut scope,
            )
            .await
        }
        .await;
        notice.clear().await;
        let image = result.report("❌ Failed to process image. Please try again later.")?;

        let headline = if photo.is_some() {
            "🖌 Image edited successfully."
        } else {
            "🖼 Image generated successfully."
        };
        sink.send(
            OutboundReply::text(format!("✦ {}\n📝 Prompt: {}", headline, prompt)).with_attachment(image),
        )
        .await?;
        scope.release().await;
        Ok(())
    }
}

pub fn commands(services: Arc<Services>) -> Vec<Arc<dyn Command>> {
    let mut commands: Vec<Arc<dyn Command>> = vec![
        Arc::new(FluxCommand::new(services.clone())),
        Arc::new(MetaGenCommand::new(services.clone())),
        Arc::new(FastDrawCommand::new(services.clone())),
        Arc::new(EditCommand::new(services.clone())),
    ];
    commands.extend(
        IMAGE_BACKENDS
            .iter()
            .map(|backend| Arc::new(SingleImageCommand::new(backend, services.clone())) as Arc<dyn Command>),
    );
    commands
}

pub fn handlers(services: Arc<Services>) -> Vec<(SelectionKind, Arc<dyn SelectionHandler>)> {
    vec![
        (
            SelectionKind::FluxGrid,
            Arc::new(FluxGridHandler {
                services: services.clone(),
            }) as Arc<dyn SelectionHandler>,
        ),
        (SelectionKind::MetaGenGrid, Arc::new(MetaGenGridHandler { services })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Attachment, MemorySink, ReplyContext};
    use crate::commands::testing::{fixture, png_bytes, Fixture, FAKE_IMAGE};
    use crate::selection::{Outcome, PendingSelectionStore, SelectionResolver};
    use mockito::Matcher;

    fn resolver_for(f: &Fixture) -> SelectionResolver {
        let mut resolver = SelectionResolver::new(f.store.clone(), f.services.cache.clone());
        for (kind, handler) in handlers(f.services.clone()) {
            resolver.register(kind, handler);
        }
        resolver
    }

    async fn serve_pngs(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", Matcher::Regex(r"^/png/".into()))
            .with_body(png_bytes([10, 200, 30, 255]))
            .create_async()
            .await
    }

    #[test]
    fn test_parse_ratio() {
        let args: Vec<String> = ["anime", "girl", "--r", "9:16"].iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_ratio(&args), ("anime girl".to_string(), Some("9:16".to_string())));

        let dangling: Vec<String> = ["cat", "--r"].iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_ratio(&dangling), ("cat --r".to_string(), None));

        assert_eq!(ratio_hint("1:1"), Some(", square format"));
        assert_eq!(ratio_hint("4:3"), None);
    }

    #[tokio::test]
    async fn test_flux_grid_and_pick() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let images: Vec<Value> = (1..=4)
            .map(|i| serde_json::json!({"image_link": format!("{}/png/{}.png", base, i)}))
            .collect();
        let _gen = server
            .mock("GET", "/flux")
            .match_query(Matcher::UrlEncoded("prompt".into(), "neon fox".into()))
            .with_body(serde_json::json!({ "images": images }).to_string())
            .create_async()
            .await;
        let _pngs = serve_pngs(&mut server).await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        FluxCommand::new(f.services.clone())
            .execute(&Invocation::new("f1nm", &["neon", "fox"], "u1"), &sink)
            .await
            .unwrap();

        let grid = sink.last().unwrap();
        assert_eq!(grid.attachments.len(), 1);
        let entry = f.store.get(&grid.id).await.unwrap();
        assert_eq!(entry.resources.len(), 4);
        assert_eq!(f.services.cache.stats().live, 4);

        let resolver = resolver_for(&f);
        let outcome = resolver.resolve(&InboundReply::new(&grid.id, "u1", "v1"), &sink).await;
        assert_eq!(
            outcome,
            Outcome::InvalidInput("❌ Invalid input. Reply with U1, U2, U3, or U4.".into())
        );

        let outcome = resolver.resolve(&InboundReply::new(&grid.id, "u1", "u2"), &sink).await;
        let Outcome::Resolved { reply, .. } = outcome else {
            panic!("expected pick");
        };
        assert_eq!(reply.body, "✅ Here is your selected image (U2) from Flux 1nm.");
        assert!(f.store.get(&grid.id).await.is_none());
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_metagen_all() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let images: Vec<Value> = (1..=4)
            .map(|i| serde_json::json!({"url": format!("{}/png/{}.png", base, i)}))
            .collect();
        let _gen = server
            .mock("POST", "/metagen")
            .match_body(Matcher::Json(serde_json::json!({"prompt": "city"})))
            .with_body(serde_json::json!({"success": true, "images": images}).to_string())
            .create_async()
            .await;
        let _pngs = serve_pngs(&mut server).await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        MetaGenCommand::new(f.services.clone())
            .execute(&Invocation::new("meta", &["city"], "u1"), &sink)
            .await
            .unwrap();
        let grid = sink.last().unwrap();

        let resolver = resolver_for(&f);
        let outcome = resolver.resolve(&InboundReply::new(&grid.id, "u1", "ALL"), &sink).await;
        assert!(matches!(outcome, Outcome::Resolved { .. }));
        assert_eq!(sink.last().unwrap().attachments.len(), 4);
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_single_image_backends() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _xl = server
            .mock("GET", "/xl")
            .match_query(Matcher::UrlEncoded("prompt".into(), "tree".into()))
            .with_body(format!(r#"{{"url": "{}/png/xl.png"}}"#, base))
            .create_async()
            .await;
        let _pngs = serve_pngs(&mut server).await;
        let _magic = server
            .mock("GET", "/magicstudio")
            .match_query(Matcher::Any)
            .with_body(FAKE_IMAGE)
            .create_async()
            .await;
        let _blender = server
            .mock("GET", "/neuralblender")
            .match_query(Matcher::Any)
            .with_body("")
            .create_async()
            .await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        let registry: Vec<Arc<dyn Command>> = commands(f.services.clone());
        let find = |name: &str| registry.iter().find(|c| c.name() == name).unwrap().clone();

        find("xl").execute(&Invocation::new("xl", &["tree"], "u1"), &sink).await.unwrap();
        assert!(sink.last().unwrap().body.contains("🧠 Prompt: tree"));

        find("magic2").execute(&Invocation::new("magic2", &["tree"], "u1"), &sink).await.unwrap();
        assert_eq!(sink.last().unwrap().attachment_sizes, vec![FAKE_IMAGE.len() as u64]);

        let err = find("neuralblender")
            .execute(&Invocation::new("neuralblender", &["tree"], "u1"), &sink)
            .await
            .unwrap_err();
        assert!(err.user_message().starts_with("❌ | Image generation failed."));
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_flagged_json_backends() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _pixar = server
            .mock("GET", "/pixarai")
            .match_query(Matcher::UrlEncoded("prompt".into(), "robot".into()))
            .with_body(
                serde_json::json!({"status": true, "result": {"url": format!("{}/png/pixar.webp", base), "id": "7"}})
                    .to_string(),
            )
            .create_async()
            .await;
        let _aiphoto = server
            .mock("GET", "/aiphoto")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("prompt".into(), "robot".into()),
                Matcher::UrlEncoded("ratio".into(), "4:5".into()),
                Matcher::UrlEncoded("slug".into(), "ai-photo-generator".into()),
            ]))
            .with_body(serde_json::json!({"success": false, "imageUrl": format!("{}/png/ai.png", base)}).to_string())
            .create_async()
            .await;
        let _pngs = serve_pngs(&mut server).await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        let registry: Vec<Arc<dyn Command>> = commands(f.services.clone());
        let find = |name: &str| registry.iter().find(|c| c.name() == name).unwrap().clone();

        find("pixarai").execute(&Invocation::new("pxai", &["robot"], "u1"), &sink).await.unwrap();
        let sent = sink.last().unwrap();
        assert_eq!(sent.body, "🎨 PixArai Image Generated\n📝 Prompt: robot");
        assert_eq!(sent.attachments.len(), 1);

        // an unset success flag fails even though a URL is present
        let err = find("aiphoto")
            .execute(&Invocation::new("aiimg", &["robot"], "u1"), &sink)
            .await
            .unwrap_err();
        assert!(err.user_message().starts_with("❌ Error generating AI image."));
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[test]
    fn test_is_set() {
        let doc = serde_json::json!({"t": true, "f": false, "s": "ok", "e": "", "n": 1, "z": 0, "null": null});
        let cases = [
            ("t", true),
            ("f", false),
            ("s", true),
            ("e", false),
            ("n", true),
            ("z", false),
            ("null", false),
            ("missing", false),
        ];
        for (key, expected) in cases {
            assert_eq!(is_set(doc.get(key)), expected, "{}", key);
        }
    }

    #[tokio::test]
    async fn test_edit_passes_replied_photo() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _dir = server
            .mock("GET", "/directory/edit.json")
            .with_body(format!(r#"{{"renz": "{}/renz"}}"#, base))
            .create_async()
            .await;
        let _edit = server
            .mock("GET", "/renz/api/gptimage")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("prompt".into(), "make it blue".into()),
                Matcher::UrlEncoded("ref".into(), "https://cdn.example/p.jpg".into()),
                Matcher::UrlEncoded("width".into(), "640".into()),
                Matcher::UrlEncoded("height".into(), "480".into()),
            ]))
            .with_body(FAKE_IMAGE)
            .create_async()
            .await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        let mut photo = Attachment::photo("https://cdn.example/p.jpg");
        photo.width = Some(640);
        photo.height = Some(480);
        let invocation = Invocation::new("edit", &["make", "it", "blue"], "u1").with_reply_context(ReplyContext {
            attachments: vec![photo],
            body: None,
        });

        EditCommand::new(f.services.clone()).execute(&invocation, &sink).await.unwrap();
        let sent = sink.last().unwrap();
        assert!(sent.body.starts_with("✦ 🖌 Image edited successfully."));
        assert_eq!(sink.visible().len(), 1);
    }
}
