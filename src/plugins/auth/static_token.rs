use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::error::UploadError;
use crate::plugins::registry::CredentialProvider;

/// Token handed in on the command line. Once invalidated it cannot be reissued.
pub struct StaticTokenProvider {
    token: Mutex<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: String) -> Self {
        Self { token: Mutex::new(Some(token)) }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    fn name(&self) -> &'static str {
        "static-token"
    }

    async fn get_token(&self, _interactive: bool) -> Result<String, UploadError> {
        self.token
            .lock()
            .await
            .clone()
            .ok_or_else(|| UploadError::Credential("static token was rejected and cannot be refreshed".to_string()))
    }

    async fn invalidate(&self, token: &str) {
        let mut t = self.token.lock().await;
        if t.as_deref() == Some(token) {
            *t = None;
        }
    }
}
