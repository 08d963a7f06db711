//! YouTube search and download commands
//!
//! `youtube` and `sing` offer a numbered list of search hits and register a
//! selection on it; `video` downloads the first hit directly.

use super::{timestamp_line, Command, Services, WaitNotice};
use crate::channels::{InboundReply, Invocation, OutboundReply, ReplySink};
use crate::error::{CommandError, ReportExt};
use crate::fetch::{require, Endpoint, FetchClient, FetchError, RequestParams};
use crate::resources::{ResourceHandle, ScopedResources};
use crate::selection::{
    FailurePolicy, Grammar, MediaFormat, PendingSelection, ReplyChoice, Resolution, SearchItem, SelectionHandler,
    SelectionKind, SelectionPayload,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hits offered per search
pub const SEARCH_LIMIT: usize = 6;

const SEPARATOR: &str = "━━━━━━━━━━━━━━━";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://\S+$").expect("url regex"));

fn is_url(text: &str) -> bool {
    URL_PATTERN.is_match(text.trim())
}

/// Video search backend
#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchItem>, FetchError>;
}

/// Search through an Invidious `/api/v1/search` endpoint
pub struct InvidiousSearch {
    fetch: FetchClient,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    video_id: String,
    #[serde(default)]
    length_seconds: Option<u64>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    video_thumbnails: Vec<InvidiousThumbnail>,
}

#[derive(Debug, Deserialize)]
struct InvidiousThumbnail {
    #[serde(default)]
    quality: String,
    url: String,
}

impl InvidiousSearch {
    pub fn new(fetch: FetchClient, url: impl Into<String>) -> Self {
        Self { fetch, url: url.into() }
    }

    /// Some instances return thumbnail paths relative to themselves
    fn absolute(&self, thumbnail: &str) -> Option<String> {
        if thumbnail.starts_with("//") {
            return Some(format!("https:{}", thumbnail));
        }
        reqwest::Url::parse(&self.url)
            .and_then(|base| base.join(thumbnail))
            .map(|u| u.to_string())
            .ok()
    }

    fn to_item(&self, hit: InvidiousItem) -> Option<SearchItem> {
        if hit.video_id.is_empty() || hit.kind.as_deref().is_some_and(|k| k != "video") {
            return None;
        }
        let thumbnail = hit
            .video_thumbnails
            .iter()
            .find(|t| t.quality == "medium")
            .or_else(|| hit.video_thumbnails.first())
            .and_then(|t| self.absolute(&t.url));

        Some(SearchItem {
            title: hit.title,
            source_url: format!("https://www.youtube.com/watch?v={}", hit.video_id),
            thumbnail_url: thumbnail,
            duration: hit.length_seconds.map(format_duration),
            author: hit.author,
        })
    }
}

#[async_trait]
impl VideoSearch for InvidiousSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchItem>, FetchError> {
        let endpoint = Endpoint::get(&self.url, Duration::from_secs(20));
        let params = RequestParams::query([("q", query), ("type", "video")]);
        let hits: Vec<InvidiousItem> = self.fetch.json(&endpoint, &params).await?;

        let items: Vec<SearchItem> = hits.into_iter().filter_map(|h| self.to_item(h)).take(limit).collect();
        debug!("Search {:?} returned {} items", query, items.len());
        Ok(items)
    }
}

fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Download every available thumbnail into `scope`; failures are skipped
async fn fetch_thumbnails(items: &[SearchItem], scope: &mut ScopedResources) -> Vec<ResourceHandle> {
    let mut thumbs = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Some(url) = item.thumbnail_url.as_deref() else {
            continue;
        };
        match scope.materialize(url, &format!("thumb_{}.jpg", i + 1)).await {
            Ok(handle) => thumbs.push(handle),
            Err(e) => warn!("Skipping thumbnail {}: {}", url, e),
        }
    }
    thumbs
}

/// Send a list with thumbnails and track it. Thumbnails are gone once the
/// list is delivered.
async fn offer_list(
    services: &Services,
    invocation: &Invocation,
    sink: &dyn ReplySink,
    kind: SelectionKind,
    body: String,
    payload: SelectionPayload,
    items: &[SearchItem],
) -> Result<(), CommandError> {
    let mut scope = services.scope();
    let thumbs = fetch_thumbnails(items, &mut scope).await;

    let sent = sink.send(OutboundReply::text(body).with_attachments(thumbs)).await;
    scope.release().await;
    let message_id = sent?;

    services
        .register_selection(&message_id, &invocation.sender_id, kind, payload, vec![])
        .await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MediaLink {
    #[serde(default)]
    status: Option<serde_json::Value>,
    download_url: Option<String>,
}

/// `{api}/yx` converter followed by the file download
async fn download_media(
    services: &Services,
    scope: &mut ScopedResources,
    api_base: &str,
    video_url: &str,
    format: MediaFormat,
) -> Result<ResourceHandle, CommandError> {
    let endpoint = Endpoint::get(format!("{}/yx", api_base), Duration::from_secs(60));
    let params = RequestParams::query([("url", video_url), ("type", format.extension())]);
    let link: MediaLink = services.fetch.json(&endpoint, &params).await?;

    let ok = match &link.status {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        _ => false,
    };
    if !ok {
        return Err(FetchError::malformed("converter reported failure").into());
    }
    let url = require(link.download_url.filter(|u| !u.is_empty()), "download_url")?;

    let handle = scope
        .materialize_with_timeout(&url, &format!("yt.{}", format.extension()), services.config.download_timeout)
        .await?;
    Ok(handle)
}

/// `youtube -v|-a <query|url>`
pub struct YoutubeCommand {
    services: Arc<Services>,
    search: Arc<dyn VideoSearch>,
}

impl YoutubeCommand {
    pub fn new(services: Arc<Services>, search: Arc<dyn VideoSearch>) -> Self {
        Self { services, search }
    }

    fn list_body(items: &[SearchItem], format: MediaFormat) -> String {
        let list = items
            .iter()
            .enumerate()
            .map(|(i, v)| format!(" • {}. {}\n   🎚️ {}", i + 1, v.title, format.quality_label()))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "✦ Temporal Coordinates\n{}\n{}\n✦ Select a media\n{}\n{}\n✦ Reply with a number (1–{})",
            timestamp_line(),
            SEPARATOR,
            list,
            SEPARATOR,
            items.len()
        )
    }
}

#[async_trait]
impl Command for YoutubeCommand {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["ytb"]
    }

    fn description(&self) -> &'static str {
        "Search and download YouTube video or audio"
    }

    fn usage(&self) -> &'static str {
        "-v|-a <query|url>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let format = invocation
            .args
            .first()
            .and_then(|flag| MediaFormat::from_flag(flag))
            .ok_or_else(|| CommandError::user_input("❌ Usage: -v <query|url> | -a <query|url>"))?;
        let query = invocation.args[1..].join(" ").trim().to_string();
        if query.is_empty() {
            return Err(CommandError::user_input("❌ Provide a search query or YouTube URL."));
        }

        let api_base = self
            .services
            .apis
            .resolve(&self.services.endpoints().media_directory, "api")
            .await
            .report("❌ Failed to fetch API configuration.")?;

        if is_url(&query) {
            let mut scope = self.services.scope();
            let file = download_media(&self.services, &mut scope, &api_base, &query, format)
                .await
                .report("❌ Failed to download media.")?;
            sink.send(OutboundReply::default().with_attachment(file)).await?;
            scope.release().await;
            return Ok(());
        }

        let items = self.search.search(&query, SEARCH_LIMIT).await.report("❌ No results found.")?;
        if items.is_empty() {
            return Err(CommandError::user_input("❌ No results found."));
        }

        let body = Self::list_body(&items, format);
        let payload = SelectionPayload::Search {
            items: items.clone(),
            format,
            api_base: Some(api_base),
        };
        offer_list(&self.services, invocation, sink, SelectionKind::VideoSearch, body, payload, &items).await
    }
}

/// Download the chosen hit of a `youtube` list
pub struct VideoSearchHandler {
    services: Arc<Services>,
}

#[async_trait]
impl SelectionHandler for VideoSearchHandler {
    fn grammar(&self, selection: &PendingSelection) -> Grammar {
        Grammar::Index {
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
        let SelectionPayload::Search { items, format, api_base } = &selection.payload else {
            return Err(CommandError::internal("video search without search payload"));
        };
        let ReplyChoice::Index(i) = choice else {
            return Err(CommandError::internal("video search expects an index"));
        };
        let item = items
            .get(i)
            .ok_or_else(|| CommandError::internal(format!("index {} outside {} items", i, items.len())))?;

        let api_base = match api_base {
            Some(base) => base.clone(),
            None => self
                .services
                .apis
                .resolve(&self.services.endpoints().media_directory, "api")
                .await
                .report("❌ Failed to fetch API configuration.")?,
        };

        let file = download_media(&self.services, scope, &api_base, &item.source_url, *format)
            .await
            .report("❌ Failed to download media.")?;
        Ok(Resolution::done(OutboundReply::default().with_attachment(file)))
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Remove
    }
}

/// `sing <song name>`
pub struct SingCommand {
    services: Arc<Services>,
    search: Arc<dyn VideoSearch>,
}

impl SingCommand {
    pub fn new(services: Arc<Services>, search: Arc<dyn VideoSearch>) -> Self {
        Self { services, search }
    }

    fn list_body(query: &str, items: &[SearchItem]) -> String {
        let list = items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                format!(
                    " • {}. {} ({})\n   👤 {}",
                    i + 1,
                    v.title,
                    v.duration.as_deref().unwrap_or("?:??"),
                    v.author.as_deref().unwrap_or("Unknown")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "✦ Temporal Coordinates\n{}\n{}\n✦ Top Results for: \"{}\"\n{}\n{}\n✦ Reply with a number (1–{}) to download",
            timestamp_line(),
            SEPARATOR,
            query,
            list,
            SEPARATOR,
            items.len()
        )
    }
}

#[async_trait]
impl Command for SingCommand {
    fn name(&self) -> &'static str {
        "sing"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["music"]
    }

    fn description(&self) -> &'static str {
        "Search and download songs from YouTube (MP3)"
    }

    fn usage(&self) -> &'static str {
        "<song name>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let query = invocation.text();
        if query.is_empty() {
            return Err(CommandError::user_input(format!(
                "❌ Please provide a song name.\nExample: {}sing sahiba",
                self.services.prefix()
            )));
        }

        let items = self
            .search
            .search(&query, SEARCH_LIMIT)
            .await
            .report("❌ Failed to fetch download link.")?;
        if items.is_empty() {
            return Err(CommandError::user_input("❌ No results found on YouTube."));
        }

        let body = Self::list_body(&query, &items);
        let payload = SelectionPayload::Search {
            items: items.clone(),
            format: MediaFormat::Audio,
            api_base: None,
        };
        offer_list(&self.services, invocation, sink, SelectionKind::SongSearch, body, payload, &items).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mp3Link {
    #[serde(default)]
    success: bool,
    direct_link: Option<String>,
    title: Option<String>,
    file_size: Option<serde_json::Value>,
    format: Option<String>,
    video_id: Option<String>,
}

/// Convert and download the chosen song
pub struct SongSearchHandler {
    services: Arc<Services>,
}

impl SongSearchHandler {
    async fn fetch_song(
        &self,
        item: &SearchItem,
        scope: &mut ScopedResources,
    ) -> Result<(Mp3Link, ResourceHandle), CommandError> {
        let base = self
            .services
            .apis
            .resolve(&self.services.endpoints().audio_directory, "ary")
            .await?;
        let endpoint = Endpoint::get(format!("{}/api/ytmp3", base), Duration::from_secs(20));
        let params = RequestParams::query([("url", item.source_url.as_str()), ("format", "mp3")]);
        let link: Mp3Link = self.services.fetch.json(&endpoint, &params).await?;

        if !link.success {
            return Err(FetchError::malformed("converter reported failure").into());
        }
        let url = require(link.direct_link.clone().filter(|u| !u.is_empty()), "directLink")?;
        let name = format!("{}.mp3", link.video_id.as_deref().unwrap_or("song"));
        let file = scope
            .materialize_with_timeout(&url, &name, self.services.config.download_timeout)
            .await?;
        Ok((link, file))
    }
}

#[async_trait]
impl SelectionHandler for SongSearchHandler {
    fn grammar(&self, selection: &PendingSelection) -> Grammar {
        Grammar::Index {
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
        let SelectionPayload::Search { items, .. } = &selection.payload else {
            return Err(CommandError::internal("song search without search payload"));
        };
        let ReplyChoice::Index(i) = choice else {
            return Err(CommandError::internal("song search expects an index"));
        };
        let item = items
            .get(i)
            .ok_or_else(|| CommandError::internal(format!("index {} outside {} items", i, items.len())))?;

        let (info, file) = self
            .fetch_song(item, scope)
            .await
            .report("❌ Error while downloading the audio.")?;

        let size = match &info.file_size {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        };
        let body = format!(
            "✦ Music Download Complete 🎵\n • 🎶 Title: {}\n • 📦 Size: {}\n • 🎧 Format: {}\n • 🔗 YouTube: {}",
            info.title.as_deref().unwrap_or(&item.title),
            size,
            info.format.as_deref().unwrap_or("mp3"),
            item.source_url
        );
        Ok(Resolution::done(OutboundReply::text(body).with_attachment(file)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoLink {
    #[serde(default)]
    status: String,
    download_url: Option<String>,
}

/// `video <query|url>`: first hit as mp4, no selection
pub struct VideoCommand {
    services: Arc<Services>,
    search: Arc<dyn VideoSearch>,
}

impl VideoCommand {
    pub fn new(services: Arc<Services>, search: Arc<dyn VideoSearch>) -> Self {
        Self { services, search }
    }

    async fn download(&self, query: &str, scope: &mut ScopedResources) -> Result<ResourceHandle, CommandError> {
        let video_url = if is_url(query) {
            query.to_string()
        } else {
            self.search
                .search(query, 1)
                .await?
                .into_iter()
                .next()
                .map(|item| item.source_url)
                .ok_or_else(|| CommandError::user_input("❌ No results found."))?
        };

        let endpoint = Endpoint::get(&self.services.endpoints().video_download, Duration::from_secs(60));
        let params = RequestParams::query([("url", video_url.as_str()), ("format", "mp4")]);
        let link: VideoLink = self.services.fetch.json(&endpoint, &params).await?;
        if link.status != "success" {
            return Err(FetchError::malformed(format!("download status {:?}", link.status)).into());
        }
        let url = require(link.download_url.filter(|u| !u.is_empty()), "downloadUrl")?;

        Ok(scope.materialize_with_timeout(&url, "video.mp4", self.services.config.download_timeout).await?)
    }
}

#[async_trait]
impl Command for VideoCommand {
    fn name(&self) -> &'static str {
        "video"
    }

    fn description(&self) -> &'static str {
        "Download a YouTube video by name or URL"
    }

    fn usage(&self) -> &'static str {
        "<query|url>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let query = invocation.text();
        if query.is_empty() {
            return Err(CommandError::user_input("❌ Enter video name or YouTube URL."));
        }

        let notice = WaitNotice::post(sink, "⏳ Downloading video...").await;
        let mut scope = self.services.scope();
        let result = self.download(&query, &mut scope).await;
        notice.clear().await;

        let file = result.report("❌ Failed to download video.")?;
        sink.send(OutboundReply::text("🎥 Here is your video").with_attachment(file)).await?;
        scope.release().await;
        Ok(())
    }
}

pub fn commands(services: Arc<Services>) -> Vec<Arc<dyn Command>> {
    let search: Arc<dyn VideoSearch> = Arc::new(InvidiousSearch::new(
        services.fetch.clone(),
        services.endpoints().youtube_search.clone(),
    ));
    vec![
        Arc::new(YoutubeCommand::new(services.clone(), search.clone())),
        Arc::new(SingCommand::new(services.clone(), search.clone())),
        Arc::new(VideoCommand::new(services, search)),
    ]
}

pub fn handlers(services: Arc<Services>) -> Vec<(SelectionKind, Arc<dyn SelectionHandler>)> {
    vec![
        (
            SelectionKind::VideoSearch,
            Arc::new(VideoSearchHandler {
                services: services.clone(),
            }) as Arc<dyn SelectionHandler>,
        ),
        (SelectionKind::SongSearch, Arc::new(SongSearchHandler { services })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemorySink;
    use crate::commands::testing::{fixture, FAKE_IMAGE};
    use crate::selection::{Outcome, PendingSelectionStore, SelectionResolver};
    use mockito::Matcher;

    fn search_body(base: &str) -> String {
        serde_json::json!([
            {"type": "video", "title": "First", "videoId": "aaa", "lengthSeconds": 75, "author": "One",
             "videoThumbnails": [{"quality": "medium", "url": format!("{}/thumb/a.jpg", base)}]},
            {"type": "channel", "title": "Not a video"},
            {"type": "video", "title": "Second", "videoId": "bbb", "lengthSeconds": 3725, "author": "Two",
             "videoThumbnails": [{"quality": "medium", "url": "/thumb/b.jpg"}]}
        ])
        .to_string()
    }

    fn resolver_for(f: &crate::commands::testing::Fixture) -> SelectionResolver {
        let mut resolver = SelectionResolver::new(f.store.clone(), f.services.cache.clone());
        for (kind, handler) in handlers(f.services.clone()) {
            resolver.register(kind, handler);
        }
        resolver
    }

    #[test]
    fn test_duration_and_url_detection() {
        assert_eq!(format_duration(75), "1:15");
        assert_eq!(format_duration(3725), "1:02:05");
        assert!(is_url("https://youtu.be/x"));
        assert!(is_url("HTTP://example.com/v"));
        assert!(!is_url("never gonna give you up"));
    }

    #[tokio::test]
    async fn test_invidious_search_filters_and_resolves_thumbnails() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "lofi".into()),
                Matcher::UrlEncoded("type".into(), "video".into()),
            ]))
            .with_body(search_body(&server.url()))
            .create_async()
            .await;

        let search = InvidiousSearch::new(FetchClient::new(), format!("{}/search", server.url()));
        let items = search.search("lofi", 6).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_url, "https://www.youtube.com/watch?v=aaa");
        assert_eq!(items[1].duration.as_deref(), Some("1:02:05"));
        assert_eq!(items[1].thumbnail_url, Some(format!("{}/thumb/b.jpg", server.url())));
    }

    #[tokio::test]
    async fn test_youtube_list_then_download() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _dir = server
            .mock("GET", "/directory/media.json")
            .with_body(format!(r#"{{"api": "{}/media/"}}"#, base))
            .create_async()
            .await;
        let _search = server
            .mock("GET", "/search")
            .match_query(Matcher::Any)
            .with_body(search_body(&base))
            .create_async()
            .await;
        let _thumbs = server
            .mock("GET", Matcher::Regex(r"^/thumb/".into()))
            .with_body(FAKE_IMAGE)
            .create_async()
            .await;
        let _convert = server
            .mock("GET", "/media/yx")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("url".into(), "https://www.youtube.com/watch?v=bbb".into()),
                Matcher::UrlEncoded("type".into(), "mp4".into()),
            ]))
            .with_body(format!(r#"{{"status": true, "download_url": "{}/file.mp4"}}"#, base))
            .create_async()
            .await;
        let _file = server.mock("GET", "/file.mp4").with_body(vec![7u8; 32]).create_async().await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        let commands = commands(f.services.clone());
        let youtube = &commands[0];

        youtube
            .execute(&Invocation::new("ytb", &["-v", "lofi", "beats"], "u1"), &sink)
            .await
            .unwrap();

        let list = sink.last().unwrap();
        assert!(list.body.contains(" • 2. Second\n   🎚️ 360p"));
        assert!(list.body.contains("Reply with a number (1–2)"));
        assert_eq!(list.attachments.len(), 2);
        assert_eq!(f.services.cache.stats().live, 0);
        assert!(f.store.get(&list.id).await.is_some());

        let resolver = resolver_for(&f);
        let outcome = resolver.resolve(&InboundReply::new(&list.id, "u1", "2"), &sink).await;
        assert!(matches!(outcome, Outcome::Resolved { .. }));
        assert_eq!(sink.last().unwrap().attachment_sizes, vec![32]);
        assert!(f.store.get(&list.id).await.is_none());
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_youtube_input_errors() {
        let f = fixture("http://127.0.0.1:9").await;
        let sink = MemorySink::new();
        let commands = commands(f.services.clone());
        let youtube = &commands[0];

        let err = youtube.execute(&Invocation::new("ytb", &["lofi"], "u1"), &sink).await.unwrap_err();
        assert_eq!(err.user_message(), "❌ Usage: -v <query|url> | -a <query|url>");

        let err = youtube.execute(&Invocation::new("ytb", &["-a"], "u1"), &sink).await.unwrap_err();
        assert_eq!(err.user_message(), "❌ Provide a search query or YouTube URL.");
    }

    #[tokio::test]
    async fn test_song_failure_keeps_selection() {
        let mut server = mockito::Server::new_async().await;
        let _dir = server
            .mock("GET", "/directory/audio.json")
            .with_status(500)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let sink = MemorySink::new();
        let payload = SelectionPayload::Search {
            items: vec![SearchItem::new("Song", "https://www.youtube.com/watch?v=s")],
            format: MediaFormat::Audio,
            api_base: None,
        };
        f.services
            .register_selection("m1", "u1", SelectionKind::SongSearch, payload, vec![])
            .await;

        let resolver = resolver_for(&f);
        let outcome = resolver.resolve(&InboundReply::new("m1", "u1", "1"), &sink).await;
        let Outcome::Failed(message) = outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("❌ Error while downloading the audio."));
        assert!(f.store.get("m1").await.is_some());

        let outcome = resolver.resolve(&InboundReply::new("m1", "u1", "3"), &sink).await;
        assert_eq!(
            outcome,
            Outcome::InvalidInput("❌ Invalid selection. Reply with a number (1–1).".into())
        );
    }
}
