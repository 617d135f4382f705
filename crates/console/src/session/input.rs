//! Command input line and recall history.

use std::collections::VecDeque;

use protocol::ServerStatus;

/// Maximum number of remembered commands.
pub const HISTORY_CAPACITY: usize = 100;

/// Previously submitted commands, most recent first, with a recall cursor.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
    cursor: Option<usize>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            cursor: None,
        }
    }

    /// Records a submitted command and resets the cursor.
    pub fn push(&mut self, command: String) {
        self.entries.push_front(command);
        self.entries.truncate(self.capacity);
        self.cursor = None;
    }

    /// Steps towards older entries, stopping at the oldest.
    ///
    /// Returns `None` when there is no history at all.
    pub fn older(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let next = match self.cursor {
            None => 0,
            Some(i) => (i + 1).min(self.entries.len() - 1),
        };
        self.cursor = Some(next);
        self.entries.get(next).map(String::as_str)
    }

    /// Steps towards newer entries. Stepping past the newest leaves history
    /// navigation and returns `None`.
    pub fn newer(&mut self) -> Option<&str> {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                self.entries.get(i - 1).map(String::as_str)
            }
            _ => {
                self.cursor = None;
                None
            }
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// The editable command line.
#[derive(Debug, Clone, Default)]
pub struct CommandInput {
    text: String,
    history: CommandHistory,
}

impl CommandInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// Replaces the text. Any edit leaves history navigation.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.history.reset_cursor();
    }

    pub fn insert_char(&mut self, c: char) {
        self.text.push(c);
        self.history.reset_cursor();
    }

    pub fn backspace(&mut self) {
        self.text.pop();
        self.history.reset_cursor();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.history.reset_cursor();
    }

    /// Recalls the next older command into the line.
    pub fn recall_older(&mut self) {
        if let Some(entry) = self.history.older() {
            self.text = entry.to_string();
        }
    }

    /// Recalls the next newer command, or empties the line past the newest.
    pub fn recall_newer(&mut self) {
        self.text = self.history.newer().map(str::to_string).unwrap_or_default();
    }

    /// Takes the trimmed command for submission.
    ///
    /// Returns `None` and leaves the line untouched when it is blank.
    /// Otherwise the command is recorded in history and the line cleared.
    pub fn take_submission(&mut self) -> Option<String> {
        let command = self.text.trim();
        if command.is_empty() {
            return None;
        }
        let command = command.to_string();
        self.history.push(command.clone());
        self.text.clear();
        Some(command)
    }
}

/// Placeholder shown in the command line.
pub fn placeholder(status: Option<ServerStatus>, can_input: bool) -> &'static str {
    if can_input {
        "Enter command..."
    } else if status == Some(ServerStatus::Starting) {
        "Server starting..."
    } else {
        "Server offline"
    }
}
