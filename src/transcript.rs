//! Plain-text transcript of the log and the summarizer seam
//!
//! The summarizer itself is an external service; this module defines
//! what it receives, what happens when it fails, and a summarizer that
//! runs a local command.

use crate::store::MessageRecord;
use anyhow::Context;
use std::future::Future;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Render records as `[<ISO-8601>] text` lines, oldest first
pub fn render(records: &[MessageRecord]) -> String {
    records
        .iter()
        .map(|r| format!("[{}] {}", r.iso_timestamp(), r.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// External analysis service fed with a rendered transcript
pub trait Summarizer {
    fn summarize(&self, transcript: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Pipes the transcript into a command's stdin and uses its stdout as the
/// summary. A failed start, a non-zero exit or empty output is an error.
#[derive(Debug, Clone)]
pub struct CommandSummarizer {
    program: String,
    args: Vec<String>,
}

impl CommandSummarizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandSummarizer {
            program: program.into(),
            args,
        }
    }

    /// Split a command line on whitespace; `None` if it is blank
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(CommandSummarizer::new(program, parts.collect()))
    }
}

impl Summarizer for CommandSummarizer {
    async fn summarize(&self, transcript: &str) -> anyhow::Result<String> {
        debug!("Running summarizer {} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        // Feed stdin from its own task so a chatty child cannot fill the
        // stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            let input = transcript.to_owned();
            tokio::spawn(async move { stdin.write_all(input.as_bytes()).await })
        });

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed to wait for {}", self.program))?;

        if let Some(writer) = writer {
            match writer.await? {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                    return Err(e).context("failed to send transcript");
                }
                _ => {}
            }
        }

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let summary = String::from_utf8(output.stdout).context("summary is not UTF-8")?;
        let summary = summary.trim_end();
        if summary.is_empty() {
            anyhow::bail!("{} produced no output", self.program);
        }
        Ok(summary.to_string())
    }
}

/// Summarize the log, falling back to the raw transcript if the
/// summarizer fails
pub async fn summarize_or_render<S: Summarizer>(summarizer: &S, records: &[MessageRecord]) -> String {
    let transcript = render(records);

    match summarizer.summarize(&transcript).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!("Summarizer failed, showing raw transcript: {:#}", e);
            transcript
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IncomingMessage;

    struct LineCounter;

    impl Summarizer for LineCounter {
        async fn summarize(&self, transcript: &str) -> anyhow::Result<String> {
            Ok(format!("{} lines", transcript.lines().count()))
        }
    }

    struct Unavailable;

    impl Summarizer for Unavailable {
        async fn summarize(&self, _transcript: &str) -> anyhow::Result<String> {
            anyhow::bail!("service returned 503")
        }
    }

    fn records() -> Vec<MessageRecord> {
        vec![
            MessageRecord::from_incoming(IncomingMessage::new(1_700_000_000, "hello")).unwrap(),
            MessageRecord::from_incoming(IncomingMessage::new(1_700_000_060, "world")).unwrap(),
        ]
    }

    #[test]
    fn test_render() {
        assert_eq!(
            render(&records()),
            "[2023-11-14T22:13:20.000Z] hello\n[2023-11-14T22:14:20.000Z] world"
        );
        assert_eq!(render(&[]), "");
    }

    #[tokio::test]
    async fn test_summary_used() {
        let out = summarize_or_render(&LineCounter, &records()).await;
        assert_eq!(out, "2 lines");
    }

    #[tokio::test]
    async fn test_falls_back_to_transcript() {
        let out = summarize_or_render(&Unavailable, &records()).await;
        assert_eq!(out, render(&records()));
    }

    #[test]
    fn test_command_line_parsing() {
        let summarizer = CommandSummarizer::parse("  tr a-z  A-Z ").unwrap();
        assert_eq!(summarizer.program, "tr");
        assert_eq!(summarizer.args, vec!["a-z", "A-Z"]);

        assert!(CommandSummarizer::parse("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_summarizer_reads_stdout() {
        let summarizer = CommandSummarizer::parse("tr a-z A-Z").unwrap();
        let out = summarize_or_render(&summarizer, &records()).await;
        assert_eq!(
            out,
            "[2023-11-14T22:13:20.000Z] HELLO\n[2023-11-14T22:14:20.000Z] WORLD"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_summarizer_failures_fall_back() {
        let failing = CommandSummarizer::new("false", Vec::new());
        assert!(failing.summarize("x").await.is_err());
        assert_eq!(
            summarize_or_render(&failing, &records()).await,
            render(&records())
        );

        let missing = CommandSummarizer::new("msgvault-no-such-summarizer", Vec::new());
        assert!(missing.summarize("x").await.is_err());
        assert_eq!(
            summarize_or_render(&missing, &records()).await,
            render(&records())
        );

        let silent = CommandSummarizer::new("true", Vec::new());
        assert!(silent.summarize("x").await.is_err());
    }
}
