// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → JSON, one object per line.
// `--json` flag forces JSON output regardless of terminal.

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use quill_presence::probe::ProbeError;

use crate::exit_code::{ExitCode, UsageError};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Machine-readable JSON (one object per line).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    write_output(&mut out, format, value, human_fn)?;
    out.flush()
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    print_diagnostic(format, "error", code, message, ANSI_RED);
}

/// Write a warning to stderr in the selected format.
pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    print_diagnostic(format, "warning", code, message, ANSI_YELLOW);
}

fn print_diagnostic(format: OutputFormat, label: &str, code: &str, message: &str, color: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line(label, message, io::stderr().is_terminal(), color);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let mut obj = serde_json::Map::new();
            obj.insert(
                label.to_string(),
                serde_json::json!({
                    "code": code,
                    "message": message,
                }),
            );
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");

    if error.chain().any(|cause| cause.is::<UsageError>()) {
        return ("USAGE", message);
    }

    // The probe sends no credentials, so a denial is server configuration.
    if error.chain().any(|cause| {
        matches!(cause.downcast_ref::<ProbeError>(), Some(ProbeError::AuthorizationDenied { .. }))
    }) {
        return (
            "HANDSHAKE_DENIED",
            format!(
                "{message}. The server must allow unauthenticated access to the web socket \
                 handshake endpoints; check its security configuration"
            ),
        );
    }

    match ExitCode::from_error(error) {
        ExitCode::Auth => (
            "AUTH_FAILURE",
            format!("{message}. Store a token with: quill login --token <token>"),
        ),
        ExitCode::Network => (
            "NETWORK_ERROR",
            format!("{message}. Check server_url in ~/.quill/config.toml or QUILL_SERVER_URL"),
        ),
        ExitCode::Usage => ("CONFIG_INVALID", message),
        ExitCode::Success | ExitCode::Error => ("ERROR", message),
    }
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
