//! Strategy process plumbing: spawn, output reader, stdin relay

use super::controller::SharedState;
use super::BridgeError;
use crate::broker::{Broker, Envelope, Received, Subscription};
use crate::config::StrategyConfig;
use crate::telemetry::{self, CounterMetric};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Spawn the strategy with piped output (and piped stdin when relaying)
pub(super) fn spawn(config: &StrategyConfig, relay_stdio: bool) -> Result<Child, BridgeError> {
    if config.command.trim().is_empty() {
        return Err(BridgeError::ProcessStartupFailure(
            "no strategy command configured".to_string(),
        ));
    }

    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .envs(&config.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if relay_stdio {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }

    command.spawn().map_err(|e| {
        BridgeError::ProcessStartupFailure(format!("failed to spawn '{}': {}", config.command, e))
    })
}

/// Recognizes the textual ready marker in process output
#[derive(Debug, Clone)]
pub(super) struct ReadyMatcher {
    bot_id: String,
    patterns: Vec<String>,
}

impl ReadyMatcher {
    pub(super) fn new(bot_id: &str, patterns: &[String]) -> Self {
        Self {
            bot_id: bot_id.to_lowercase(),
            patterns: patterns
                .iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Line names this bot and one of the ready patterns, ignoring case
    ///
    /// A blank bot id never matches, since every line would contain it.
    pub(super) fn matches(&self, line: &str) -> bool {
        if self.bot_id.trim().is_empty() {
            return false;
        }
        let line = line.to_lowercase();
        line.contains(&self.bot_id) && self.patterns.iter().any(|p| line.contains(p.as_str()))
    }
}

/// Everything the output reader needs from its bridge
pub(super) struct OutputReader {
    pub(super) bot_id: String,
    pub(super) broker: Arc<dyn Broker>,
    pub(super) shared: Arc<SharedState>,
    pub(super) matcher: ReadyMatcher,
    pub(super) relay_stdio: bool,
}

impl OutputReader {
    /// Read both output streams until each reaches EOF
    pub(super) async fn run(self, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
        let mut stdout = stdout.map(|s| BufReader::new(s).lines());
        let mut stderr = stderr.map(|s| BufReader::new(s).lines());

        loop {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => self.handle_stdout(line).await,
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => self.handle_log_line(&line, true),
                    None => stderr = None,
                },
                else => break,
            }
        }

        tracing::debug!(bot_id = %self.bot_id, "Strategy output closed");
    }

    async fn handle_stdout(&self, line: String) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if self.relay_stdio && trimmed.starts_with('{') {
            if let Ok(envelope) = serde_json::from_str::<Envelope>(trimmed) {
                let topic = envelope.topic.clone();
                if let Err(e) = self.broker.publish(envelope).await {
                    self.shared.record_publish_error();
                    tracing::warn!(bot_id = %self.bot_id, %topic, error = %e, "Failed to relay strategy message");
                } else {
                    tracing::trace!(bot_id = %self.bot_id, %topic, "Relayed strategy message");
                }
                return;
            }
        }

        self.handle_log_line(trimmed, false);
    }

    fn handle_log_line(&self, line: &str, stderr: bool) {
        self.shared.output_lines.fetch_add(1, Ordering::Relaxed);
        if stderr {
            tracing::info!(bot_id = %self.bot_id, "[strategy] {}", line);
        } else {
            tracing::debug!(bot_id = %self.bot_id, "[strategy] {}", line);
        }

        if !self.shared.is_ready() && self.matcher.matches(line) {
            tracing::info!(bot_id = %self.bot_id, "Ready marker found in strategy output");
            self.shared.mark_ready();
        }
    }
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read strategy output");
                None
            }
        },
        None => None,
    }
}

/// Forward subscribed broker traffic to the process's stdin as JSON lines
///
/// Ends after forwarding the shutdown notice, so the process sees EOF.
pub(super) async fn relay_stdin(
    mut stdin: ChildStdin,
    mut subscription: Subscription,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    shutdown_topic: String,
) {
    while running.load(Ordering::SeqCst) {
        let envelope = match subscription.recv_timeout(poll_interval).await {
            Received::Message(envelope) => envelope,
            Received::Timeout => continue,
            Received::Closed => {
                tracing::warn!("Relay subscription closed");
                break;
            }
        };

        let mut line = match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(topic = %envelope.topic, error = %e, "Failed to encode relay message");
                continue;
            }
        };
        line.push('\n');

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            telemetry::increment(CounterMetric::PublishErrors, 1);
            tracing::warn!(topic = %envelope.topic, error = %e, "Strategy stdin closed, stopping relay");
            break;
        }

        if envelope.topic == shutdown_topic {
            tracing::debug!("Shutdown notice forwarded, closing strategy stdin");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_matcher() {
        let matcher = ReadyMatcher::new("Bot-1", &["ready".to_string(), "initialized".to_string()]);

        assert!(matcher.matches("bot-1 READY"));
        assert!(matcher.matches("[BOT-1] strategy initialized"));
        assert!(!matcher.matches("bot-2 ready"));
        assert!(!matcher.matches("bot-1 warming up"));
    }

    #[test]
    fn test_ready_matcher_ignores_empty_patterns() {
        let matcher = ReadyMatcher::new("bot-1", &[String::new()]);
        assert!(!matcher.matches("bot-1 anything"));
    }

    #[test]
    fn test_ready_matcher_blank_bot_id_never_matches() {
        let matcher = ReadyMatcher::new("", &["ready".to_string()]);
        assert!(!matcher.matches("bot-2 ready"));
        assert!(!matcher.matches("ready"));
        assert!(!ReadyMatcher::new("  ", &["ready".to_string()]).matches("bot-1  ready"));
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let result = spawn(&StrategyConfig::default(), true);
        assert!(matches!(result, Err(BridgeError::ProcessStartupFailure(_))));
    }

    #[tokio::test]
    async fn test_spawn_reports_missing_executable() {
        let config = StrategyConfig {
            command: "/definitely/not/a/strategy".to_string(),
            ..Default::default()
        };
        match spawn(&config, false) {
            Err(BridgeError::ProcessStartupFailure(msg)) => assert!(msg.contains("failed to spawn")),
            other => panic!("expected startup failure, got {:?}", other.map(|_| ())),
        }
    }
}
