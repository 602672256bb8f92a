// `quill watch`: join a document and stream its viewer list.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Args;
use quill_common::types::{CurrentUser, DocumentId, PresenceUser};
use quill_presence::config::{IdentityConfig, QuillConfig};
use quill_presence::credentials;
use quill_presence::transport::stomp_ws::StompWsFactory;
use quill_presence::{PresenceBinding, PresenceState};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::exit_code::UsageError;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Document to join.
    #[arg(long = "doc")]
    pub document_id: DocumentId,
    /// User id to join as (overrides `[identity]` in the config file).
    #[arg(long)]
    pub user_id: Option<i64>,
    /// Display name to join as.
    #[arg(long)]
    pub name: Option<String>,
    /// Email to join as.
    #[arg(long)]
    pub email: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewerSnapshot {
    pub document_id: DocumentId,
    pub at: DateTime<Utc>,
    pub viewers: Vec<PresenceUser>,
}

pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let config = QuillConfig::load().context("failed to load quill config")?;
    let user = resolve_user(&args, &config.identity)?;

    let token = match credentials::load_access_token() {
        Ok(token) => token,
        Err(error) => {
            warn!(error = %format!("{error:#}"), "continuing without an access token");
            None
        }
    };
    let url = config.presence_url(token.as_deref())?;
    info!(
        document_id = args.document_id,
        user_id = user.id,
        endpoint = %without_query(&url),
        "watching document presence"
    );

    let factory = Arc::new(StompWsFactory::new(url, config.stomp_options()));
    let mut binding = PresenceBinding::new(factory, config.session_options());
    binding.update(Some(args.document_id), Some(user)).await;
    let Some(handle) = binding.handle() else {
        bail!("presence session did not start for document {}", args.document_id);
    };
    let states = handle.state_changes();
    let viewers = binding.viewers();

    let outcome = stream_until_interrupted(format, args.document_id, viewers, states, &config).await;
    binding.close().await;
    info!(document_id = args.document_id, "left document");
    outcome
}

async fn stream_until_interrupted(
    format: OutputFormat,
    document_id: DocumentId,
    mut viewers: watch::Receiver<Vec<PresenceUser>>,
    mut states: watch::Receiver<PresenceState>,
    config: &QuillConfig,
) -> anyhow::Result<()> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            interrupted = &mut shutdown => {
                if let Err(error) = interrupted {
                    warn!(error = %error, "failed to listen for Ctrl-C");
                }
                return Ok(());
            }
            changed = viewers.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = ViewerSnapshot {
                    document_id,
                    at: Utc::now(),
                    viewers: viewers.borrow_and_update().clone(),
                };
                output::print_output(format, &snapshot, format_human)
                    .context("failed to write viewer list")?;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = *states.borrow_and_update();
                if state == PresenceState::Disconnected {
                    output::print_warning(
                        format,
                        "PRESENCE_DISCONNECTED",
                        &format!(
                            "connection lost; retrying in {} ms",
                            config.presence.reconnect_delay_ms
                        ),
                    );
                }
            }
        }
    }
}

/// Flags win field by field over the `[identity]` config section.
fn resolve_user(args: &WatchArgs, identity: &IdentityConfig) -> Result<CurrentUser, UsageError> {
    let id = args.user_id.or(identity.user_id);
    let name = args.name.clone().or_else(|| identity.name.clone());
    let email = args.email.clone().or_else(|| identity.email.clone());

    let missing: Vec<&str> = [
        ("user_id", id.is_none()),
        ("name", name.is_none()),
        ("email", email.is_none()),
    ]
    .into_iter()
    .filter_map(|(field, absent)| absent.then_some(field))
    .collect();

    match (id, name, email) {
        (Some(id), Some(name), Some(email)) => Ok(CurrentUser::new(id, name, email)),
        _ => Err(UsageError(format!(
            "missing identity {}: pass --user-id/--name/--email or set [identity] in ~/.quill/config.toml",
            missing.join(", ")
        ))),
    }
}

fn without_query(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url
}

fn format_human(snapshot: &ViewerSnapshot) -> String {
    let mut lines = Vec::new();
    let when = snapshot.at.format("%H:%M:%S");
    match snapshot.viewers.len() {
        0 => lines.push(format!("[{when}] document {}: no viewers", snapshot.document_id)),
        count => {
            lines.push(format!("[{when}] document {}: {count} viewing", snapshot.document_id));
            for viewer in &snapshot.viewers {
                lines.push(format!("  {} <{}> (#{})", viewer.name, viewer.email, viewer.user_id));
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::write_output;
    use chrono::TimeZone;

    fn args() -> WatchArgs {
        WatchArgs { document_id: 42, user_id: None, name: None, email: None, json: false }
    }

    fn sample_snapshot() -> ViewerSnapshot {
        ViewerSnapshot {
            document_id: 42,
            at: Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap(),
            viewers: vec![
                PresenceUser { user_id: 7, name: "Kim".into(), email: "k@x.com".into() },
                PresenceUser { user_id: 8, name: "Lee".into(), email: "lee@x.com".into() },
            ],
        }
    }

    #[test]
    fn identity_comes_from_config() {
        let identity = IdentityConfig {
            user_id: Some(7),
            name: Some("Kim".into()),
            email: Some("k@x.com".into()),
        };
        let user = resolve_user(&args(), &identity).unwrap();
        assert_eq!(user, CurrentUser::new(7, "Kim", "k@x.com"));
    }

    #[test]
    fn flags_override_config_per_field() {
        let identity = IdentityConfig {
            user_id: Some(7),
            name: Some("Kim".into()),
            email: Some("k@x.com".into()),
        };
        let args = WatchArgs { name: Some("Kimberly".into()), ..args() };
        let user = resolve_user(&args, &identity).unwrap();
        assert_eq!(user, CurrentUser::new(7, "Kimberly", "k@x.com"));
    }

    #[test]
    fn incomplete_identity_names_missing_fields() {
        let args = WatchArgs { user_id: Some(7), ..args() };
        let error = resolve_user(&args, &IdentityConfig::default()).unwrap_err();
        assert!(error.0.contains("name, email"));
        assert!(!error.0.contains("user_id"));
    }

    #[test]
    fn logged_endpoint_drops_token() {
        let url = Url::parse("wss://quill.example.com/ws/presence?token=secret").unwrap();
        assert_eq!(without_query(&url).as_str(), "wss://quill.example.com/ws/presence");
    }

    #[test]
    fn human_format_lists_viewers() {
        let output = format_human(&sample_snapshot());
        assert!(output.starts_with("[09:30:05] document 42: 2 viewing"));
        assert!(output.contains("  Kim <k@x.com> (#7)"));
        assert!(output.contains("  Lee <lee@x.com> (#8)"));
    }

    #[test]
    fn human_format_empty_list() {
        let snapshot = ViewerSnapshot { viewers: Vec::new(), ..sample_snapshot() };
        assert_eq!(format_human(&snapshot), "[09:30:05] document 42: no viewers");
    }

    #[test]
    fn json_format_uses_wire_field_names() {
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Json, &sample_snapshot(), |_| String::new()).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(String::from_utf8(buf).unwrap().trim()).unwrap();
        assert_eq!(parsed["document_id"], 42);
        assert_eq!(parsed["viewers"][0]["userId"], 7);
        assert_eq!(parsed["at"], "2026-10-18T09:30:05Z");
    }
}
