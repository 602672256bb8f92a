// quill CLI entry point.

use clap::Parser;

mod commands;
mod exit_code;
mod output;

use exit_code::ExitCode;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "quill", about = "Live document presence for Quill")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::detect(cli.command.json());
    match commands::run(cli.command).await {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::from_error(&error).into()
        }
    }
}
