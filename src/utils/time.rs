//! Time and host utilities

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Format a provider timestamp (float seconds) as RFC 3339
pub fn format_timestamp(timestamp: f64) -> String {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    match Utc.timestamp_opt(secs as i64, nanos).single() {
        Some(dt) => format_datetime(&dt),
        None => timestamp.to_string(),
    }
}

/// Format a UTC time as RFC 3339 with second precision
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Get the local host name used in bounce messages
///
/// Tries the `hostname` command, then the HOSTNAME environment variable,
/// then `/etc/hostname`, and falls back to "localhost".
pub fn local_hostname() -> String {
    use std::env;
    use std::process::Command;

    if let Ok(output) = Command::new("hostname").output() {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(name) = env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }

    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
