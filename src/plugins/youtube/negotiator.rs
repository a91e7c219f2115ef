use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::core::error::UploadError;
use crate::core::model::{SessionLocation, UploadRequest, Visibility};
use crate::plugins::registry::{DriverContext, SessionNegotiator};

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

const SESSION_QUERY: &str = "uploadType=resumable&part=snippet,status";

#[derive(Serialize)]
struct VideoMetadata<'a> {
    snippet: Snippet<'a>,
    status: Status,
}

#[derive(Serialize)]
struct Snippet<'a> {
    title: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    privacy_status: Visibility,
}

pub struct YouTubeNegotiator {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Option<Duration>,
}

impl YouTubeNegotiator {
    pub fn new(ctx: &DriverContext) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(ctx.user_agent.clone())
            .build()?;
        let endpoint = Url::parse(&ctx.endpoint)?;
        Ok(Self {
            client,
            endpoint,
            timeout: ctx.session_timeout(),
        })
    }

    fn session_url(&self) -> Url {
        let mut u = self.endpoint.clone();
        u.set_query(Some(SESSION_QUERY));
        u
    }
}

#[async_trait]
impl SessionNegotiator for YouTubeNegotiator {
    fn name(&self) -> &'static str {
        "youtube-negotiator"
    }

    async fn open(&self, req: &UploadRequest, token: &str) -> Result<SessionLocation, UploadError> {
        if token.trim().is_empty() {
            return Err(UploadError::Authentication { retryable: false });
        }

        let metadata = VideoMetadata {
            snippet: Snippet { title: req.payload.title() },
            status: Status { privacy_status: req.visibility },
        };

        let mut rb = self
            .client
            .post(self.session_url())
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-Upload-Content-Type", req.payload.upload_content_type())
            .header("X-Upload-Content-Length", req.payload.size.to_string())
            .json(&metadata);
        if let Some(t) = self.timeout {
            rb = rb.timeout(t);
        }
        let resp = rb.send().await?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(item = %req.item_id, %status, "session negotiation rejected");
            return Err(UploadError::Session { status });
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| UploadError::Protocol("no upload session URI returned".to_string()))?;

        // Relative locations resolve against the endpoint.
        let url = self
            .endpoint
            .join(location)
            .map_err(|e| UploadError::Protocol(format!("invalid session URI {}: {}", location, e)))?;

        Ok(SessionLocation(url))
    }
}
