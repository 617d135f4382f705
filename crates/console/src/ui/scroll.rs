//! Scrollback position over the console log.

use std::ops::Range;

use crate::session::LogBuffer;

/// Scroll state measured in lines from the bottom of the log.
///
/// While pinned the view follows new output. Scrolling up unpins it, and from
/// then on the offset grows with each appended line so the same lines stay in
/// view until the operator scrolls back down or jumps to the latest output.
#[derive(Debug, Clone)]
pub struct Scrollback {
    offset: usize,
    pinned: bool,
    seen: u64,
}

impl Default for Scrollback {
    fn default() -> Self {
        Self {
            offset: 0,
            pinned: true,
            seen: 0,
        }
    }
}

impl Scrollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Lines between the bottom of the view and the newest line.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Accounts for lines appended since the last sync.
    pub fn sync(&mut self, buffer: &LogBuffer) {
        let fresh = buffer.pushed_total().saturating_sub(self.seen) as usize;
        self.seen = buffer.pushed_total();
        if !self.pinned {
            self.offset = (self.offset + fresh).min(buffer.len().saturating_sub(1));
        }
    }

    pub fn scroll_up(&mut self, lines: usize, len: usize) {
        self.offset = (self.offset + lines).min(len.saturating_sub(1));
        self.pinned = self.offset == 0;
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.offset = self.offset.saturating_sub(lines);
        if self.offset == 0 {
            self.pinned = true;
        }
    }

    /// Re-pins the view to the newest output.
    pub fn jump_to_latest(&mut self) {
        self.offset = 0;
        self.pinned = true;
    }

    /// Indices of the lines visible in a pane `height` lines tall.
    pub fn window(&self, len: usize, height: usize) -> Range<usize> {
        let max_offset = len.saturating_sub(height);
        let end = len - self.offset.min(max_offset);
        end.saturating_sub(height)..end
    }
}
