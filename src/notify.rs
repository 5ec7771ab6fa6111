//! Desktop notifications
//!
//! Deployment outcomes are surfaced through the platform notifier when one
//! is available. Notifications are best-effort: a missing or failing
//! notifier never affects the run.

use std::process::{Command, Stdio};

/// Send a desktop notification. Failures are swallowed.
pub fn notify(summary: &str, body: &str) {
    let _ = send(summary, body);
}

#[cfg(target_os = "macos")]
fn send(summary: &str, body: &str) -> std::io::Result<()> {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        escape(body),
        escape(summary)
    );
    Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(drop)
}

#[cfg(not(target_os = "macos"))]
fn send(summary: &str, body: &str) -> std::io::Result<()> {
    Command::new("notify-send")
        .arg(summary)
        .arg(body)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(drop)
}

#[cfg(target_os = "macos")]
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
