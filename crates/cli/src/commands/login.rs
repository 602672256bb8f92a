// `quill login`: store an access token, optionally pointing at a server.

use anyhow::Context;
use clap::Args;
use quill_presence::config::{self, QuillConfig};
use quill_presence::credentials;
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Access token issued by the Quill server.
    #[arg(long)]
    pub token: String,
    /// Server URL to save in `~/.quill/config.toml`.
    #[arg(long)]
    pub server: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct LoginResult {
    token_stored: bool,
    server_url: Option<String>,
}

pub fn run(args: LoginArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);

    let server_url = match args.server {
        Some(server) => {
            let path = config::config_path().ok_or(config::ConfigError::NoHomeDir)?;
            let mut cfg = if path.exists() {
                QuillConfig::load_from(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?
            } else {
                QuillConfig::default()
            };
            cfg.server_url = server;
            // Reject URLs the presence client could never connect to.
            cfg.presence_url(None)?;
            cfg.save_to(&path).with_context(|| format!("failed to write {}", path.display()))?;
            Some(cfg.server_url)
        }
        None => None,
    };

    credentials::store_access_token(&args.token)?;
    let result = LoginResult { token_stored: true, server_url };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &LoginResult) -> String {
    match &result.server_url {
        Some(url) => format!("Access token stored in the OS keychain. Server set to {url}."),
        None => "Access token stored in the OS keychain.".to_string(),
    }
}
