// `quill logout`: remove the stored access token.

use clap::Args;
use quill_presence::credentials;
use serde_json::json;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct LogoutArgs {
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: LogoutArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    credentials::clear_access_token()?;
    output::print_output(format, &json!({ "token_stored": false }), |_| {
        "Access token removed from the OS keychain.".to_string()
    })?;
    Ok(())
}
