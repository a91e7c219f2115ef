use crate::core::error::UploadError;
use crate::plugins::registry::CredentialProvider;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-wide bearer token shared by every item of a queue.
///
/// Only the explicit sign-in action and the queue's one-shot 401 retry path
/// change the stored token.
pub struct SharedCredential {
    provider: Arc<dyn CredentialProvider>,
    token: RwLock<Option<String>>,
}

impl SharedCredential {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider, token: RwLock::new(None) }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Non-interactive lookup at startup. Failure just leaves us signed out.
    pub async fn try_silent(&self) -> bool {
        match self.provider.get_token(false).await {
            Ok(t) => {
                *self.token.write().await = Some(t);
                true
            }
            Err(e) => {
                tracing::debug!(provider = self.provider.name(), error = %e, "silent sign-in unavailable");
                false
            }
        }
    }

    pub async fn authorize(&self, interactive: bool) -> Result<(), UploadError> {
        let t = self.provider.get_token(interactive).await?;
        *self.token.write().await = Some(t);
        Ok(())
    }

    /// Empty when signed out.
    pub async fn current(&self) -> String {
        self.token.read().await.clone().unwrap_or_default()
    }

    pub async fn is_authorized(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Drops the cached token at the provider and asks for a new one. The
    /// stored token is only replaced when the provider issues a new one.
    pub async fn refresh(&self) -> Result<(), UploadError> {
        let mut slot = self.token.write().await;
        if let Some(old) = slot.as_deref() {
            self.provider.invalidate(old).await;
        }
        let fresh = self.provider.get_token(true).await?;
        *slot = Some(fresh);
        Ok(())
    }
}
