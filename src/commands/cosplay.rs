use super::{Command, Services, WaitNotice};
use crate::channels::{Invocation, OutboundReply, ReplySink};
use crate::error::{CommandError, ReportExt};
use crate::fetch::{require, Endpoint, RequestParams};
use crate::resources::{ResourceHandle, ScopedResources};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CosplayResponse {
    #[serde(rename = "videoUrl")]
    video_url: Option<String>,
}

/// `cosplay`: one random cosplay clip
pub struct CosplayCommand {
    services: Arc<Services>,
}

impl CosplayCommand {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn fetch_clip(&self, scope: &mut ScopedResources) -> Result<ResourceHandle, CommandError> {
        let endpoint = Endpoint::get(&self.services.endpoints().cosplay, Duration::from_secs(20));
        let params = match self.services.config.cosplay_key.as_deref() {
            Some(key) => RequestParams::query([("apikey", key)]),
            None => RequestParams::None,
        };
        let response: CosplayResponse = self.services.fetch.json(&endpoint, &params).await?;
        let url = require(response.video_url.filter(|u| !u.is_empty()), "videoUrl")?;
        Ok(scope
            .materialize_with_timeout(&url, "cosplay.mp4", self.services.config.download_timeout)
            .await?)
    }
}

#[async_trait]
impl Command for CosplayCommand {
    fn name(&self) -> &'static str {
        "cosplay"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["cp", "cos"]
    }

    fn description(&self) -> &'static str {
        "Fetch a random cosplay video"
    }

    async fn execute(&self, _invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let notice = WaitNotice::post(sink, "🎭 Fetching a cosplay video... ⏳").await;
        let mut scope = self.services.scope();
        let result = self.fetch_clip(&mut scope).await;
        notice.clear().await;
        let clip = result.report("❌ Unable to fetch the video. Please try again later.")?;

        sink.send(OutboundReply::text("✦ Cosplay video fetched!").with_attachment(clip))
            .await?;
        scope.release().await;
        Ok(())
    }
}
