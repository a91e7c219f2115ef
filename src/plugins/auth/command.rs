use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::core::error::UploadError;
use crate::plugins::registry::CredentialProvider;

/// Runs an external command (e.g. `gcloud auth print-access-token`) and caches its stdout.
pub struct CommandTokenProvider {
    command: String,
    cached: Mutex<Option<String>>,
}

impl CommandTokenProvider {
    pub fn new(command: String) -> Self {
        Self { command, cached: Mutex::new(None) }
    }

    fn shell(&self) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        cmd.arg(&self.command);
        cmd
    }

    async fn run(&self) -> Result<String, UploadError> {
        tracing::info!(command = %self.command, "requesting access token");

        // The command may prompt, so it gets the terminal's stdin and stderr.
        let out = self
            .shell()
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| UploadError::Credential(format!("spawn token command: {}", e)))?;

        if !out.status.success() {
            return Err(UploadError::Credential(format!("token command exited with {}", out.status)));
        }

        let token = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if token.is_empty() {
            return Err(UploadError::Credential("token command printed nothing".to_string()));
        }
        Ok(token)
    }
}

#[async_trait]
impl CredentialProvider for CommandTokenProvider {
    fn name(&self) -> &'static str {
        "token-command"
    }

    async fn get_token(&self, interactive: bool) -> Result<String, UploadError> {
        let mut cached = self.cached.lock().await;
        if let Some(t) = cached.as_ref() {
            return Ok(t.clone());
        }
        if !interactive {
            return Err(UploadError::Credential("no cached token".to_string()));
        }

        let token = self.run().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self, token: &str) {
        let mut cached = self.cached.lock().await;
        if cached.as_deref() == Some(token) {
            *cached = None;
        }
    }
}
