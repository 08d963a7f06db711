use super::{Command, Services, WaitNotice};
use crate::channels::{Invocation, OutboundReply, ReplySink};
use crate::error::{CommandError, ReportExt};
use crate::fetch::{Endpoint, RequestParams};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct LyricsResponse {
    artist_name: Option<String>,
    track_name: Option<String>,
    artwork_url: Option<String>,
    lyrics: Option<String>,
}

/// `lyrics <song>`: lyrics with the album artwork
pub struct LyricsCommand {
    services: Arc<Services>,
}

impl LyricsCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn lookup(&self, title: &str) -> Result<LyricsResponse, CommandError> {
        let endpoint = Endpoint::get(&self.services.endpoints().lyrics, Duration::from_secs(120));
        let found: LyricsResponse = self
            .services
            .fetch
            .json(&endpoint, &RequestParams::query([("title", title)]))
            .await?;
        if found.lyrics.as_deref().map_or(true, |l| l.trim().is_empty()) {
            return Err(CommandError::user_input("❌ No lyrics found for this song."));
        }
        Ok(found)
    }
}

#[async_trait]
impl Command for LyricsCommand {
    fn name(&self) -> &'static str {
        "lyrics"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["lyric", "lyrics-song"]
    }

    fn description(&self) -> &'static str {
        "Fetch song lyrics with artwork"
    }

    fn usage(&self) -> &'static str {
        "<song name>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let query = invocation.text();
        if query.is_empty() {
            return Err(CommandError::user_input(
                "❌ Please provide a song name.\nExample: lyrics apt",
            ));
        }

        let notice = WaitNotice::post(sink, &format!("⏳ Searching lyrics for: {}", query)).await;
        let result = self.lookup(&query).await;
        notice.clear().await;
        let found = result.report("❌ Lyrics lookup failed.")?;

        let body = format!(
            "🎼 {}\n👤 Artist: {}\n\n{}",
            found.track_name.as_deref().unwrap_or(&query),
            found.artist_name.as_deref().unwrap_or("Unknown"),
            found.lyrics.as_deref().unwrap_or_default().trim()
        );

        // artwork is decoration; lyrics go out without it
        let mut scope = self.services.scope();
        let mut reply = OutboundReply::text(body);
        if let Some(url) = found.artwork_url.as_deref().filter(|u| !u.is_empty()) {
            match scope
                .materialize_with_timeout(url, "lyrics.jpg", self.services.config.download_timeout)
                .await
            {
                Ok(artwork) => reply = reply.with_attachment(artwork),
                Err(e) => warn!("Artwork download failed for {:?}: {}", query, e),
            }
        }

        sink.send(reply).await?;
        scope.release().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemorySink;
    use crate::commands::testing::{fixture, FAKE_IMAGE};
    use mockito::Matcher;

    #[tokio::test]
    async fn test_lyrics_with_artwork() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _lyrics = server
            .mock("GET", "/lyrics")
            .match_query(Matcher::UrlEncoded("title".into(), "apt".into()))
            .with_body(
                serde_json::json!({
                    "artist_name": "ROSÉ",
                    "track_name": "APT.",
                    "artwork_url": format!("{}/art.jpg", base),
                    "lyrics": "la la la\n"
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _art = server.mock("GET", "/art.jpg").with_body(FAKE_IMAGE).create_async().await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        LyricsCommand::new(f.services.clone())
            .execute(&Invocation::new("lyrics", &["apt"], "u1"), &sink)
            .await
            .unwrap();

        let sent = sink.last().unwrap();
        assert_eq!(sent.body, "🎼 APT.\n👤 Artist: ROSÉ\n\nla la la");
        assert_eq!(sent.attachments.len(), 1);
        assert_eq!(sink.visible().len(), 1);
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_lyrics_missing_artwork_still_answers() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _lyrics = server
            .mock("GET", "/lyrics")
            .match_query(Matcher::Any)
            .with_body(format!(r#"{{"track_name": "X", "artwork_url": "{}/gone.jpg", "lyrics": "words"}}"#, base))
            .create_async()
            .await;
        let _art = server.mock("GET", "/gone.jpg").with_status(404).create_async().await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        LyricsCommand::new(f.services.clone())
            .execute(&Invocation::new("lyrics", &["x"], "u1"), &sink)
            .await
            .unwrap();
        assert!(sink.last().unwrap().attachments.is_empty());
    }

    #[tokio::test]
    async fn test_lyrics_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _lyrics = server
            .mock("GET", "/lyrics")
            .match_query(Matcher::Any)
            .with_body(r#"{"lyrics": ""}"#)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let sink = MemorySink::new();
        let err = LyricsCommand::new(f.services.clone())
            .execute(&Invocation::new("lyrics", &["nothing"], "u1"), &sink)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "❌ No lyrics found for this song.");
    }
}
