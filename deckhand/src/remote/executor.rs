//! Streaming command execution.
//!
//! Output is decoded into complete lines as it arrives. Each line goes to the
//! caller's sink immediately and into the transcript returned at the end.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::remote::session::{ChannelEvent, RemoteSession, SessionError};
use crate::remote::sink::LineSink;

/// Splits a byte stream into lines, holding back a trailing partial line
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// The unterminated remainder, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Everything one command printed on one host
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionTranscript {
    pub target: String,
    pub output_lines: Vec<String>,
    pub error_lines: Vec<String>,
    pub exit_status: Option<u32>,
    pub failed: bool,
}

impl ExecutionTranscript {
    /// Transcript of a target that never ran the command
    pub fn unreachable(target: &str, error: &SessionError) -> Self {
        Self::not_run(target, error.to_string())
    }

    /// A failed transcript holding only `reason`
    pub fn not_run(target: &str, reason: String) -> Self {
        Self {
            target: target.to_string(),
            error_lines: vec![reason],
            failed: true,
            ..Default::default()
        }
    }

    /// Append the lines of `other`, failing if it failed
    pub fn absorb(&mut self, other: ExecutionTranscript) {
        self.output_lines.extend(other.output_lines);
        self.error_lines.extend(other.error_lines);
        if other.exit_status.is_some() {
            self.exit_status = other.exit_status;
        }
        self.failed |= other.failed;
    }

    /// `{"out": [...], "err": [...]}`, the shape stored on records
    pub fn to_log(&self) -> serde_json::Value {
        serde_json::json!({
            "out": self.output_lines,
            "err": self.error_lines,
        })
    }
}

/// Some no-op remote scripts print a lone bracket pair on stderr
fn is_empty_bracket_pair(lines: &[String]) -> bool {
    lines.len() == 2 && lines[0] == "[" && lines[1] == "]"
}

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub poll_interval: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
        }
    }
}

pub struct StreamingExecutor {
    options: ExecutorOptions,
}

impl StreamingExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    /// Run `command` on `session` under a pseudo-terminal.
    ///
    /// Returns once the channel is closed and both stream buffers are drained.
    pub async fn run(
        &self,
        session: &mut dyn RemoteSession,
        target: &str,
        command: &str,
        sink: &dyn LineSink,
    ) -> Result<ExecutionTranscript, SessionError> {
        info!(host = target, "SSH CMD {}", command);
        let mut channel = session.exec(command).await?;

        let mut transcript = ExecutionTranscript {
            target: target.to_string(),
            ..Default::default()
        };
        let mut stdout = LineBuffer::new();
        let mut stderr = LineBuffer::new();

        loop {
            let event = match tokio::time::timeout(self.options.poll_interval, channel.next_event())
                .await
            {
                Ok(event) => event,
                Err(_) => {
                    debug!(host = target, "No output within poll interval");
                    continue;
                }
            };

            match event {
                Some(ChannelEvent::Stdout(chunk)) => {
                    for line in stdout.feed(&chunk) {
                        emit(sink, target, &mut transcript.output_lines, line);
                    }
                }
                Some(ChannelEvent::Stderr(chunk)) => {
                    for line in stderr.feed(&chunk) {
                        emit(sink, target, &mut transcript.error_lines, line);
                    }
                }
                Some(ChannelEvent::ExitStatus(code)) => transcript.exit_status = Some(code),
                None => break,
            }
        }

        if let Some(line) = stdout.finish() {
            emit(sink, target, &mut transcript.output_lines, line);
        }
        if let Some(line) = stderr.finish() {
            emit(sink, target, &mut transcript.error_lines, line);
        }

        if is_empty_bracket_pair(&transcript.error_lines) {
            transcript.error_lines.clear();
        }

        transcript.failed = !transcript.error_lines.is_empty()
            || transcript.exit_status.is_some_and(|code| code != 0);

        debug!(
            host = target,
            out = transcript.output_lines.len(),
            err = transcript.error_lines.len(),
            exit = ?transcript.exit_status,
            "Command finished"
        );
        Ok(transcript)
    }
}

fn emit(sink: &dyn LineSink, target: &str, buffer: &mut Vec<String>, line: String) {
    debug!(host = target, "{}", line);
    sink.push(&line);
    buffer.push(line);
}
