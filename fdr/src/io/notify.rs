//! Best-effort completion signals: a sound and an ntfy push.
//!
//! Failures here never reach the caller; they are only visible at debug level.

use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::HeaderValue;
use tracing::debug;

use crate::io::process::{CommandRunner, CommandSpec};

const MAC_SOUNDS: &[&str] = &["Purr", "Tink", "Pop", "Glass"];
const FREEDESKTOP_SOUNDS: &[&str] = &["complete.oga", "service-login.oga", "message.oga"];
const NTFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Play the first available system sound, falling back to the terminal bell.
pub fn play_completion_sound(runner: &dyn CommandRunner) {
    let mac = MAC_SOUNDS
        .iter()
        .map(|name| format!("/System/Library/Sounds/{name}.aiff"))
        .find(|path| Path::new(path).exists());
    if let Some(sound) = mac {
        run_quietly(runner, CommandSpec::new("afplay").arg(sound));
        return;
    }

    let freedesktop = FREEDESKTOP_SOUNDS
        .iter()
        .map(|name| format!("/usr/share/sounds/freedesktop/stereo/{name}"))
        .find(|path| Path::new(path).exists());
    if let Some(sound) = freedesktop {
        run_quietly(runner, CommandSpec::new("paplay").arg(sound));
        return;
    }

    let canberra = CommandSpec::new("canberra-gtk-play").args(["-i", "complete", "-d", "fix-die-repeat"]);
    if run_quietly(runner, canberra) {
        return;
    }

    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}

fn run_quietly(runner: &dyn CommandRunner, spec: CommandSpec) -> bool {
    match runner.run(&spec.timeout(Some(Duration::from_secs(10)))) {
        Ok(out) => out.success(),
        Err(err) => {
            debug!(err = %format!("{err:#}"), "sound player unavailable");
            false
        }
    }
}

/// Topic name ntfy accepts: lowercase alphanumerics, `.`, `_`, `-`.
pub fn sanitize_topic(text: &str) -> String {
    static INVALID: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9._-]").expect("topic pattern is valid"));
    INVALID
        .replace_all(&text.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Headers and body of one ntfy message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfyMessage {
    pub topic: String,
    pub title: &'static str,
    pub tags: &'static str,
    pub priority: &'static str,
    pub body: String,
}

impl NtfyMessage {
    pub fn new(success: bool, duration: &str, repo_name: &str) -> Self {
        let topic = sanitize_topic(repo_name);
        let (title, tags, priority) = if success {
            ("✓ fix-die-repeat completed", "white_check_mark,done", "default")
        } else {
            ("✗ fix-die-repeat failed", "warning,x", "high")
        };
        let body = format!("{title} ({duration}) in {topic}");
        Self {
            topic,
            title,
            tags,
            priority,
            body,
        }
    }
}

/// POST `message` to `<ntfy_url>/<topic>`.
pub fn send_ntfy(ntfy_url: &str, message: &NtfyMessage) {
    let url = format!("{}/{}", ntfy_url.trim_end_matches('/'), message.topic);
    let client = match reqwest::blocking::Client::builder()
        .timeout(NTFY_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            debug!(err = %err, "unable to build ntfy client");
            return;
        }
    };
    let title = HeaderValue::from_bytes(message.title.as_bytes());
    let request = client
        .post(&url)
        .header("Tags", message.tags)
        .header("Priority", message.priority)
        .body(message.body.clone());
    let request = match title {
        Ok(title) => request.header("Title", title),
        Err(_) => request,
    };
    match request.send() {
        Ok(resp) => debug!(status = %resp.status(), "Sent ntfy notification to {url}"),
        Err(err) => debug!(err = %err, "ntfy notification failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_sanitized() {
        assert_eq!(sanitize_topic("My Repo!"), "my-repo");
        assert_eq!(sanitize_topic("fix_die.repeat"), "fix_die.repeat");
        assert_eq!(sanitize_topic("--x--"), "x");
    }

    #[test]
    fn success_and_failure_messages_differ() {
        let ok = NtfyMessage::new(true, "1m 2s", "Widgets");
        assert_eq!(ok.title, "✓ fix-die-repeat completed");
        assert_eq!(ok.priority, "default");
        assert_eq!(ok.body, "✓ fix-die-repeat completed (1m 2s) in widgets");

        let failed = NtfyMessage::new(false, "5s", "widgets");
        assert_eq!(failed.tags, "warning,x");
        assert_eq!(failed.priority, "high");
    }

    #[test]
    fn unreachable_server_is_swallowed() {
        let message = NtfyMessage::new(true, "1s", "repo");
        send_ntfy("http://127.0.0.1:9", &message);
    }
}
