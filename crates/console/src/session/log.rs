//! Bounded console log and inbound frame ingestion.
//!
//! [`LogIngest`] is the only writer of the log buffer. It decodes inbound
//! frames, runs the startup-milestone classifier on the line about to be
//! stored, then appends it, evicting the oldest entries beyond
//! [`LOG_CAPACITY`]. Connection lifecycle notices go through
//! [`LogIngest::append_marker`]; they are stored like any other line and only
//! differ by their leading [`MARKER_PREFIX`].

use std::collections::VecDeque;
use std::time::Duration;

use chrono::NaiveTime;

use super::classify::StartupProgress;

/// Maximum number of lines kept in the console log.
pub const LOG_CAPACITY: usize = 500;

/// Leading delimiter of locally generated marker lines.
pub const MARKER_PREFIX: char = '\u{2014}';

/// Returns whether a stored line is a synthetic marker.
pub fn is_marker(line: &str) -> bool {
    line.starts_with(MARKER_PREFIX)
}

/// Formats a marker timestamp as `HH:MM:SS`.
fn clock(at: NaiveTime) -> String {
    at.format("%H:%M:%S").to_string()
}

/// Formats a reconnect delay for display (`2s`, `1.5s`).
pub fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{:.1}s", delay.as_secs_f64())
    }
}

/// Marker appended when a dropped channel comes back.
pub fn reconnected_marker(at: NaiveTime) -> String {
    format!("{} reconnected at {} {}", MARKER_PREFIX, clock(at), MARKER_PREFIX)
}

/// Marker appended when the channel closes and no reconnect follows.
pub fn disconnected_marker(at: NaiveTime) -> String {
    format!("{} disconnected at {} {}", MARKER_PREFIX, clock(at), MARKER_PREFIX)
}

/// Marker appended when an unexpected close schedules a reconnect.
pub fn reconnecting_marker(attempt: u32, at: NaiveTime, delay: Duration) -> String {
    if attempt <= 1 {
        format!(
            "{} disconnected at {} {} reconnecting in {}...",
            MARKER_PREFIX,
            clock(at),
            MARKER_PREFIX,
            format_delay(delay)
        )
    } else {
        format!(
            "{} reconnect attempt {} at {} in {}...",
            MARKER_PREFIX,
            attempt,
            clock(at),
            format_delay(delay)
        )
    }
}

/// Insertion-ordered ring of log lines with a fixed capacity.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    pushed: u64,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl LogBuffer {
    /// Creates an empty buffer holding at most `capacity` lines.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            pushed: 0,
        }
    }

    /// Appends a line, dropping the oldest ones beyond capacity.
    pub fn push(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        self.pushed += 1;
    }

    /// Removes every stored line.
    ///
    /// The running push count is kept so readers tracking it never see it go
    /// backwards.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns whether older output has been (or is about to be) evicted.
    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    /// Total number of lines ever pushed, including evicted and cleared ones.
    pub fn pushed_total(&self) -> u64 {
        self.pushed
    }

    /// Lines pushed since a reader last observed `pushed_total() == seen`,
    /// limited to what is still stored.
    pub fn since(&self, seen: u64) -> impl Iterator<Item = &str> {
        let fresh = self.pushed.saturating_sub(seen).min(self.lines.len() as u64) as usize;
        self.lines
            .iter()
            .skip(self.lines.len() - fresh)
            .map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.lines.iter().map(String::as_str)
    }

    /// Joins the stored lines with newlines, for export.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }
}

/// Owner of the console log and the log-derived startup milestones.
#[derive(Debug, Clone, Default)]
pub struct LogIngest {
    buffer: LogBuffer,
    startup: StartupProgress,
}

impl LogIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an ingest with a custom buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: LogBuffer::with_capacity(capacity),
            startup: StartupProgress::default(),
        }
    }

    /// Ingests one raw inbound frame.
    ///
    /// Never fails: frames that do not decode are stored verbatim.
    pub fn ingest_frame(&mut self, raw: &str) {
        let line = protocol::decode_line(raw);
        self.ingest_line(line);
    }

    /// Classifies and stores one display line.
    pub fn ingest_line(&mut self, line: String) {
        self.startup = self.startup.advance(&line);
        self.buffer.push(line);
    }

    /// Stores a synthetic marker line without classifying it.
    pub fn append_marker(&mut self, marker: String) {
        debug_assert!(is_marker(&marker));
        self.buffer.push(marker);
    }

    /// Empties the log (fresh connection).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub fn startup(&self) -> &StartupProgress {
        &self.startup
    }

    pub fn startup_mut(&mut self) -> &mut StartupProgress {
        &mut self.startup
    }
}
