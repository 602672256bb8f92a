// `quill probe`: check the presence handshake endpoint.

use anyhow::Context;
use clap::Args;
use quill_presence::config::QuillConfig;
use quill_presence::probe::{self, ProbeReport};
use tracing::info;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ProbeArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let config = QuillConfig::load().context("failed to load quill config")?;
    let url = config.probe_url()?;
    let client = probe::default_client().context("failed to build HTTP client")?;

    info!(url = %url, "probing presence handshake endpoint");
    let report = probe::probe_handshake(&client, &url).await?;
    output::print_output(format, &report, format_human)?;
    Ok(())
}

fn format_human(report: &ProbeReport) -> String {
    format!("handshake endpoint {} is reachable without credentials (HTTP {})", report.url, report.status)
}
