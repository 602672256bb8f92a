// Consistent exit codes for the quill CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument/config error
//   11 = authentication error
//   13 = network error

use std::process;

use quill_presence::config::ConfigError;
use quill_presence::probe::ProbeError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<UsageError>().is_some() {
                return Self::Usage;
            }
            if let Some(probe_err) = cause.downcast_ref::<ProbeError>() {
                return match probe_err {
                    ProbeError::AuthorizationDenied { .. } => Self::Auth,
                    ProbeError::Request { .. } => Self::Network,
                };
            }
            if let Some(config_err) = cause.downcast_ref::<ConfigError>() {
                return match config_err {
                    ConfigError::InvalidUrl { .. } | ConfigError::InsecureScheme(_) => Self::Usage,
                    ConfigError::Parse(_) => Self::Usage,
                    _ => Self::Error,
                };
            }
            if let Some(keyring_err) = cause.downcast_ref::<keyring::Error>() {
                return match keyring_err {
                    keyring::Error::NoStorageAccess(_) => Self::Auth,
                    _ => Self::Error,
                };
            }
            if let Some(http_err) = cause.downcast_ref::<reqwest::Error>() {
                if http_err.is_connect() || http_err.is_timeout() {
                    return Self::Network;
                }
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                        Self::Network
                    }
                    _ => Self::Error,
                };
            }
        }

        Self::Error
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// Invalid or incomplete command input that clap cannot catch on its own.
#[derive(Debug)]
pub struct UsageError(pub String);

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}
