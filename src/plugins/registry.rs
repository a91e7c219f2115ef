use crate::core::error::UploadError;
use crate::core::model::{SessionLocation, UploadRequest, UploadedVideo};
use async_trait::async_trait;
use clap::{ArgMatches, Command};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Supplies bearer tokens for the remote API.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// With `interactive == false` the provider must not prompt the user.
    async fn get_token(&self, interactive: bool) -> Result<String, UploadError>;

    async fn invalidate(&self, token: &str);
}

/// Opens a resumable upload session for one item.
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn open(&self, req: &UploadRequest, token: &str) -> Result<SessionLocation, UploadError>;
}

/// Called with `(bytes_sent, total_bytes)` as the body goes out.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Sends the file body to an open session.
#[async_trait]
pub trait ByteTransport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(
        &self,
        req: &UploadRequest,
        session: &SessionLocation,
        progress: ProgressFn,
    ) -> Result<UploadedVideo, UploadError>;
}

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    pub endpoint: String,
    /// 0 disables the session request timeout.
    pub timeout_secs: u64,
    /// 0 disables the body timeout.
    pub upload_timeout_secs: u64,
}

impl DriverContext {
    pub fn session_timeout(&self) -> Option<Duration> {
        secs_or_none(self.timeout_secs)
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        secs_or_none(self.upload_timeout_secs)
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            user_agent: "OrangeUploader/0.1".to_string(),
            endpoint: crate::plugins::youtube::negotiator::DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 60,
            upload_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadCliConfig {
    pub options: HashMap<String, String>,
    pub driver_ctx: DriverContext,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_upload_command(&self, cmd: Command) -> Command;
    fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { cli_plugins: vec![] };
        reg.cli_plugins.push(Box::new(crate::plugins::youtube::cli::YouTubeCliPlugin::new()));
        reg.cli_plugins.push(Box::new(crate::plugins::auth::cli::AuthCliPlugin::new()));
        reg
    }

    pub fn augment_upload_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_upload_command(c))
    }

    pub fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            tracing::debug!(plugin = p.name(), "applying cli options");
            p.apply_upload_matches(matches, cfg)?;
        }
        Ok(())
    }

    /// A token command wins over a literal token.
    pub fn credential_provider(&self, cfg: &UploadCliConfig) -> anyhow::Result<Arc<dyn CredentialProvider>> {
        if let Some(cmd) = cfg.options.get("token_command") {
            return Ok(Arc::new(crate::plugins::auth::command::CommandTokenProvider::new(cmd.clone())));
        }
        if let Some(token) = cfg.options.get("token") {
            return Ok(Arc::new(crate::plugins::auth::static_token::StaticTokenProvider::new(token.clone())));
        }
        anyhow::bail!("no credential source: pass --token, set YT_UPLOAD_TOKEN, or use --token-command")
    }

    pub fn negotiator(&self, cfg: &UploadCliConfig) -> anyhow::Result<Arc<dyn SessionNegotiator>> {
        Ok(Arc::new(crate::plugins::youtube::negotiator::YouTubeNegotiator::new(&cfg.driver_ctx)?))
    }

    pub fn transport(&self, cfg: &UploadCliConfig) -> anyhow::Result<Arc<dyn ByteTransport>> {
        Ok(Arc::new(crate::plugins::youtube::transport::YouTubeTransport::new(&cfg.driver_ctx)?))
    }
}
