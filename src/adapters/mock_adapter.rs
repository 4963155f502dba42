//! Mock transport for testing
//!
//! Serves scripted replies instead of talking to hardware. It provides:
//! - A queue of canned replies (single lines, bursts, or silence)
//! - Controllable I/O failure injection
//! - A log of every payload written, for test verification

use super::Transport;
use crate::adapters::serial_adapter::DEFAULT_TIMEOUT;
use crate::error::{MocoError, MocoResult};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// One scripted answer from the simulated instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// A single line; `\r\n` is appended when served.
    Line(String),
    /// A burst of lines for multi-line reads; `\r\n` is appended to each.
    Lines(Vec<String>),
    /// The device stays silent; reads time out.
    Silence,
}

/// Scripted [`Transport`] for tests
///
/// # Example
///
/// ```
/// use moco::adapters::MockTransport;
/// use moco::Moco;
///
/// let transport = MockTransport::new().with_line("OK");
/// let mut moco = Moco::new(transport);
/// moco.go().unwrap();
/// assert_eq!(moco.transport().sent(), ["GO\r?ERR\r"]);
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    replies: VecDeque<MockReply>,
    sent: Vec<String>,
    timeout: Duration,
    fail_next: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a mock with no scripted replies
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            sent: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            fail_next: false,
        }
    }

    /// Queue a single-line reply
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.push_line(line);
        self
    }

    /// Queue a multi-line burst
    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_lines(lines);
        self
    }

    /// Queue a read that never gets an answer
    pub fn with_silence(mut self) -> Self {
        self.replies.push_back(MockReply::Silence);
        self
    }

    /// Timeout reported in [`MocoError::Timeout`] when a read goes unanswered
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Queue a single-line reply on an existing mock
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.replies.push_back(MockReply::Line(line.into()));
    }

    /// Queue a multi-line burst on an existing mock
    pub fn push_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies
            .push_back(MockReply::Lines(lines.into_iter().map(Into::into).collect()));
    }

    /// Inject an I/O failure for the next operation
    pub fn inject_next_failure(&mut self) {
        self.fail_next = true;
    }

    /// Every payload written so far, decoded as text
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Clear the payload log
    pub fn clear_log(&mut self) {
        self.sent.clear();
    }

    /// Number of scripted replies not yet consumed
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    fn record(&mut self, data: &[u8]) -> MocoResult<()> {
        self.sent.push(String::from_utf8_lossy(data).into_owned());
        if std::mem::take(&mut self.fail_next) {
            return Err(MocoError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Injected failure",
            )));
        }
        Ok(())
    }
}

fn terminated(line: &str) -> Vec<u8> {
    format!("{}\r\n", line).into_bytes()
}

impl Transport for MockTransport {
    fn write_read_line(&mut self, data: &[u8]) -> MocoResult<Vec<u8>> {
        self.record(data)?;
        match self.replies.pop_front() {
            Some(MockReply::Line(line)) => Ok(terminated(&line)),
            Some(MockReply::Lines(lines)) => match lines.first() {
                Some(first) => Ok(terminated(first)),
                None => Err(MocoError::Timeout(self.timeout)),
            },
            Some(MockReply::Silence) | None => Err(MocoError::Timeout(self.timeout)),
        }
    }

    fn write_read_lines(&mut self, data: &[u8]) -> MocoResult<Vec<Vec<u8>>> {
        self.record(data)?;
        match self.replies.pop_front() {
            Some(MockReply::Lines(lines)) => Ok(lines.iter().map(|l| terminated(l)).collect()),
            Some(MockReply::Line(line)) => Ok(vec![terminated(&line)]),
            Some(MockReply::Silence) | None => Ok(Vec::new()),
        }
    }

    fn write_raw(&mut self, data: &[u8]) -> MocoResult<()> {
        self.record(data)
    }

    fn read_timeout(&self) -> Duration {
        self.timeout
    }
}
