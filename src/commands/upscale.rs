use super::{Command, Services, WaitNotice};
use crate::channels::{Invocation, OutboundReply, ReplySink};
use crate::error::{CommandError, ReportExt};
use crate::fetch::{require, Endpoint, FetchError, RequestParams};
use crate::resources::{ResourceHandle, ScopedResources};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct UpscaleResponse {
    image: Option<String>,
}

/// `4k <url>` or `4k` in reply to a photo
pub struct UpscaleCommand {
    services: Arc<Services>,
}

impl UpscaleCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// URL argument first, then the replied-to photo
    fn source_url(invocation: &Invocation) -> Option<String> {
        invocation
            .args
            .iter()
            .find(|a| a.starts_with("http"))
            .cloned()
            .or_else(|| {
                invocation
                    .reply_context
                    .as_ref()
                    .and_then(|c| c.first_photo())
                    .map(|p| p.url.clone())
            })
    }

    async fn enhance(&self, url: &str, scope: &mut ScopedResources) -> Result<ResourceHandle, CommandError> {
        let endpoint = Endpoint::get(&self.services.endpoints().upscale, Duration::from_secs(45));
        let response: UpscaleResponse = self
            .services
            .fetch
            .json(&endpoint, &RequestParams::query([("url", url)]))
            .await?;
        let enhanced = require(response.image.filter(|u| !u.is_empty()), "image")?;
        Ok(scope
            .materialize_with_timeout(&enhanced, "upscale_4k.jpg", Duration::from_secs(60))
            .await?)
    }
}

fn failure_text(err: &CommandError) -> &'static str {
    match err.fetch_error() {
        Some(FetchError::ClientError(400)) => "❌ Invalid image or unsupported dimensions.",
        Some(FetchError::Timeout) => "❌ Response time exceeded (the upscaler is too slow).",
        _ => "❌ Unable to enhance the image. Try again later.",
    }
}

#[async_trait]
impl Command for UpscaleCommand {
    fn name(&self) -> &'static str {
        "4k"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["upscale", "hd", "enhance"]
    }

    fn description(&self) -> &'static str {
        "Upscale an image to 4K"
    }

    fn usage(&self) -> &'static str {
        "<image url> (or reply to a photo)"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let url = Self::source_url(invocation).ok_or_else(|| {
            CommandError::user_input("❌ Provide an image URL or reply to an image to enhance it.")
        })?;

        let notice = WaitNotice::post(sink, "🖼️ Enhancing image (4K)... ⏳").await;
        let mut scope = self.services.scope();
        let result = self.enhance(&url, &mut scope).await;
        notice.clear().await;
        let image = match result {
            Ok(image) => image,
            Err(e) => {
                let text = failure_text(&e);
                return Err(e).report(text);
            }
        };

        sink.send(OutboundReply::text("✦ Image enhanced to 4K successfully").with_attachment(image))
            .await?;
        scope.release().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Attachment, MemorySink, ReplyContext};
    use crate::commands::testing::{fixture, FAKE_IMAGE};
    use mockito::Matcher;

    #[test]
    fn test_source_url_precedence() {
        let ctx = ReplyContext {
            attachments: vec![Attachment::photo("https://cdn/p.jpg")],
            body: None,
        };
        let from_reply = Invocation::new("4k", &[], "u1").with_reply_context(ctx.clone());
        assert_eq!(UpscaleCommand::source_url(&from_reply).as_deref(), Some("https://cdn/p.jpg"));

        let from_args = Invocation::new("4k", &["https://x/y.png"], "u1").with_reply_context(ctx);
        assert_eq!(UpscaleCommand::source_url(&from_args).as_deref(), Some("https://x/y.png"));

        assert!(UpscaleCommand::source_url(&Invocation::new("4k", &["pls"], "u1")).is_none());
    }

    #[tokio::test]
    async fn test_upscale_success() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _api = server
            .mock("GET", "/4k")
            .match_query(Matcher::UrlEncoded("url".into(), "https://x/y.png".into()))
            .with_body(format!(r#"{{"image": "{}/big.jpg"}}"#, base))
            .create_async()
            .await;
        let _img = server.mock("GET", "/big.jpg").with_body(FAKE_IMAGE).create_async().await;

        let f = fixture(&base).await;
        let sink = MemorySink::new();
        UpscaleCommand::new(f.services.clone())
            .execute(&Invocation::new("hd", &["https://x/y.png"], "u1"), &sink)
            .await
            .unwrap();
        assert_eq!(sink.last().unwrap().attachments.len(), 1);
        assert_eq!(f.services.cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_upscale_rejected_image() {
        let mut server = mockito::Server::new_async().await;
        let _api = server
            .mock("GET", "/4k")
            .match_query(Matcher::Any)
            .with_status(400)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let sink = MemorySink::new();
        let err = UpscaleCommand::new(f.services.clone())
            .execute(&Invocation::new("4k", &["https://x/y.png"], "u1"), &sink)
            .await
            .unwrap_err();
        assert!(err.user_message().starts_with("❌ Invalid image or unsupported dimensions."));
    }
}
