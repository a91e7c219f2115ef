use crate::plugins::registry::{CliPlugin, UploadCliConfig};
use clap::{Arg, ArgMatches, Command};

pub const TOKEN_ENV: &str = "YT_UPLOAD_TOKEN";

pub struct AuthCliPlugin;

impl AuthCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl CliPlugin for AuthCliPlugin {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn augment_upload_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("auth_token")
                .long("token")
                .env(TOKEN_ENV)
                .hide_env_values(true)
                .help_heading("AUTH")
                .help("OAuth bearer token")
                .num_args(1),
        )
        .arg(
            Arg::new("auth_token_command")
                .long("token-command")
                .help_heading("AUTH")
                .help("Command printing a fresh access token, e.g. 'gcloud auth print-access-token'")
                .num_args(1),
        )
    }

    fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()> {
        if let Some(v) = matches.get_one::<String>("auth_token_command") {
            if v.trim().is_empty() {
                anyhow::bail!("--token-command must not be empty");
            }
            cfg.options.insert("token_command".to_string(), v.clone());
        }

        if let Some(t) = matches.get_one::<String>("auth_token").filter(|t| !t.trim().is_empty()) {
            cfg.options.insert("token".to_string(), t.trim().to_string());
        }
        Ok(())
    }
}
