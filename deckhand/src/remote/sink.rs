//! Destinations for streamed output lines

use std::sync::Mutex;

/// Receives each complete output line as soon as it is decoded.
///
/// Pushing never fails: a sink whose consumer went away drops lines silently,
/// the job itself keeps running.
pub trait LineSink: Send + Sync {
    fn push(&self, line: &str);
}

impl<F> LineSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn push(&self, line: &str) {
        self(line)
    }
}

/// Prefixes every line with the host it came from
pub struct HostLabeled<'a> {
    host: &'a str,
    inner: &'a dyn LineSink,
}

impl<'a> HostLabeled<'a> {
    pub fn new(host: &'a str, inner: &'a dyn LineSink) -> Self {
        Self { host, inner }
    }
}

impl LineSink for HostLabeled<'_> {
    fn push(&self, line: &str) {
        self.inner.push(&format!("[{}] {}", self.host, line));
    }
}

/// Keeps every line in memory
#[derive(Default)]
pub struct Collector {
    lines: Mutex<Vec<String>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LineSink for Collector {
    fn push(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}
