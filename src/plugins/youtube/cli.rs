use crate::plugins::registry::{CliPlugin, UploadCliConfig};
use crate::plugins::youtube::negotiator::DEFAULT_ENDPOINT;
use clap::{Arg, ArgMatches, Command};

pub struct YouTubeCliPlugin;

impl YouTubeCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl CliPlugin for YouTubeCliPlugin {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn augment_upload_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("yt_endpoint")
                .long("endpoint")
                .help_heading("YOUTUBE")
                .help("Resumable upload endpoint")
                .default_value(DEFAULT_ENDPOINT)
                .num_args(1),
        )
        .arg(
            Arg::new("yt_user_agent")
                .long("user-agent")
                .help_heading("YOUTUBE")
                .help("HTTP User-Agent")
                .default_value("OrangeUploader/0.1")
                .num_args(1),
        )
        .arg(
            Arg::new("yt_timeout_secs")
                .long("timeout-secs")
                .help_heading("YOUTUBE")
                .help("Timeout in seconds for session requests (0 = none)")
                .default_value("60")
                .num_args(1),
        )
        .arg(
            Arg::new("yt_upload_timeout_secs")
                .long("upload-timeout-secs")
                .help_heading("YOUTUBE")
                .help("Timeout in seconds for the file body (0 = none)")
                .default_value("0")
                .num_args(1),
        )
    }

    fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()> {
        if let Some(s) = matches.get_one::<String>("yt_endpoint") {
            url::Url::parse(s).map_err(|e| anyhow::anyhow!("invalid endpoint {}: {}", s, e))?;
            cfg.driver_ctx.endpoint = s.clone();
        }
        if let Some(ua) = matches.get_one::<String>("yt_user_agent") {
            cfg.driver_ctx.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("yt_timeout_secs") {
            cfg.driver_ctx.timeout_secs = s.parse()?;
        }
        if let Some(s) = matches.get_one::<String>("yt_upload_timeout_secs") {
            cfg.driver_ctx.upload_timeout_secs = s.parse()?;
        }
        Ok(())
    }
}
