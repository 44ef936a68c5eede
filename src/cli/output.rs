use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use colored::Colorize;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::error::FarmgateError;
use crate::session::{SessionEvent, TokenTriple, UserProfile};
use crate::types::ApiResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pretty,
    Json,
}

impl OutputMode {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Pretty
        }
    }
}

fn stdout_is_tty() -> bool {
    std::io::stdout().is_terminal()
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Describe when `expires_at` lapses relative to `now`.
pub fn describe_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = expires_at else {
        return "unknown expiry".into();
    };
    let secs = (at - now).num_seconds();
    if secs <= 0 {
        format!("expired {} ago", human_duration(-secs))
    } else {
        format!("expires in {}", human_duration(secs))
    }
}

fn human_duration(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s => format!("{}h{}m", s / 3600, (s % 3600) / 60),
    }
}

fn display_name(user: &UserProfile) -> String {
    let full = [user.first_name.as_deref(), user.last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if full.is_empty() {
        user.username.clone()
    } else {
        format!("{} ({full})", user.username)
    }
}

/// Session status. Token values are never printed, only their presence.
pub fn print_status(tokens: Option<&TokenTriple>, mode: OutputMode) {
    let now = Utc::now();
    match mode {
        OutputMode::Json => print_json(&serde_json::json!({
            "loggedIn": tokens.is_some(),
            "expiresAt": tokens.and_then(|t| t.expires_at),
            "expired": tokens.map(|t| t.is_expired_at(now)),
            "hasRefreshToken": tokens.map(|t| !t.refresh_token.is_empty()),
        })),
        OutputMode::Pretty => match tokens {
            None => println!("Not logged in"),
            Some(t) => {
                let expiry = describe_expiry(t.expires_at, now);
                let state = if t.is_expired_at(now) {
                    "Logged in (access token expired, will refresh on next request)"
                } else {
                    "Logged in"
                };
                if stdout_is_tty() {
                    println!("{} {}", state.green().bold(), format!("[{expiry}]").dimmed());
                } else {
                    println!("{state} [{expiry}]");
                }
            }
        },
    }
}

pub fn print_profile(user: &UserProfile, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(&serde_json::to_value(user).unwrap_or_default()),
        OutputMode::Pretty => {
            let heading = display_name(user);
            if stdout_is_tty() {
                println!("{}", heading.bold());
            } else {
                println!("{heading}");
            }
            println!("  {:<6} {}", "id", user.id);
            let rows = [
                ("email", &user.email),
                ("phone", &user.phone),
                ("role", &user.role),
            ];
            for (label, value) in rows {
                if let Some(value) = value {
                    println!("  {label:<6} {value}");
                }
            }
        }
    }
}

pub fn print_login(user: Option<&UserProfile>, username: &str) {
    let who = user.map(display_name).unwrap_or_else(|| username.to_string());
    if stdout_is_tty() {
        println!("{} {who}", "Logged in as".green());
    } else {
        println!("Logged in as {who}");
    }
}

/// Response body, pretty-printed when it is JSON.
pub fn print_response(response: &ApiResponse, mode: OutputMode) {
    let parsed = serde_json::from_str::<serde_json::Value>(&response.body).ok();
    match mode {
        OutputMode::Json => print_json(&serde_json::json!({
            "status": response.status.as_u16(),
            "body": parsed.unwrap_or_else(|| serde_json::Value::String(response.body.clone())),
        })),
        OutputMode::Pretty => match parsed {
            Some(v) => print_json(&v),
            None if response.body.is_empty() => {
                println!("HTTP {}", response.status.as_u16())
            }
            None => println!("{}", response.body),
        },
    }
}

pub fn print_error(err: &FarmgateError, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(&err.to_json()),
        OutputMode::Pretty => {
            if std::io::stderr().is_terminal() {
                eprintln!("{}: {err}", "Error".red().bold());
            } else {
                eprintln!("Error: {err}");
            }
            if err.is_session_lost() && !matches!(err, FarmgateError::NotLoggedIn) {
                eprintln!("Your session has ended. Run: farmgate login <username>");
            }
        }
    }
}

/// Report session events that happened while a command ran. Only the ones
/// a user needs to act on are shown.
pub fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Invalidated { reason }) => {
                tracing::debug!(%reason, "session invalidated");
                eprintln!("warning: signed out because {reason}");
            }
            Ok(event) => tracing::debug!(?event, "session event"),
            Err(TryRecvError::Lagged(n)) => tracing::debug!(skipped = n, "session events lagged"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}
