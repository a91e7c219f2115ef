use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use crate::core::error::UploadError;
use crate::core::model::{SessionLocation, UploadRequest, UploadedVideo};
use crate::core::payload::content_range;
use crate::plugins::registry::{ByteTransport, DriverContext, ProgressFn};

/// Single PUT of the whole file. No chunking and no resume from an offset.
pub struct YouTubeTransport {
    client: reqwest::Client,
    upload_timeout: Option<Duration>,
}

impl YouTubeTransport {
    pub fn new(ctx: &DriverContext) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(ctx.user_agent.clone())
            .build()?;
        Ok(Self { client, upload_timeout: ctx.upload_timeout() })
    }

    #[cfg(test)]
    fn with_upload_timeout(mut self, d: Duration) -> Self {
        self.upload_timeout = Some(d);
        self
    }
}

#[async_trait]
impl ByteTransport for YouTubeTransport {
    fn name(&self) -> &'static str {
        "youtube-transport"
    }

    async fn send(
        &self,
        req: &UploadRequest,
        session: &SessionLocation,
        progress: ProgressFn,
    ) -> Result<UploadedVideo, UploadError> {
        let file = tokio::fs::File::open(&req.payload.path).await?;
        let total = req.payload.size;

        let mut sent = 0u64;
        let body = ReaderStream::new(file).map(move |chunk: std::io::Result<Bytes>| {
            if let Ok(b) = &chunk {
                sent += b.len() as u64;
                progress(sent.min(total), total);
            }
            chunk
        });

        let mut rb = self
            .client
            .put(session.0.clone())
            .header(CONTENT_TYPE, req.payload.body_content_type())
            .header(CONTENT_LENGTH, total)
            .header(CONTENT_RANGE, content_range(total))
            .body(reqwest::Body::wrap_stream(body));
        if let Some(t) = self.upload_timeout {
            rb = rb.timeout(t);
        }

        tracing::debug!(item = %req.item_id, size = total, %session, "sending body");
        let resp = rb.send().await?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let raw = resp.bytes().await?;
                let body: serde_json::Value = serde_json::from_slice(&raw)
                    .map_err(|e| UploadError::Protocol(format!("unparsable upload response: {}", e)))?;
                Ok(UploadedVideo::from_json(body))
            }
            StatusCode::UNAUTHORIZED => Err(UploadError::Authentication { retryable: true }),
            status => Err(UploadError::Transport { status }),
        }
    }
}
