//! Line classifiers.
//!
//! Two independent, pure classifiers run over console lines:
//!
//! - [`classify_style`] picks a display category for rendering.
//! - [`StartupProgress::advance`] derives the four boot milestones from log
//!   output while a server is starting.
//!
//! Both are ordered rule lists where the first matching rule wins.

use once_cell::sync::Lazy;
use regex::Regex;

use super::log::is_marker;

/// Display category of a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineStyle {
    /// Locally generated lifecycle marker.
    Marker,
    /// Echo of a command typed by the operator (`> list`).
    CommandEcho,
    Error,
    Warning,
    /// The server reported it finished booting.
    Ready,
    /// Main-thread informational output.
    Info,
    /// Anything else.
    Muted,
}

static STYLE_RULES: Lazy<Vec<(Regex, LineStyle)>> = Lazy::new(|| {
    [
        (r"^\s*> ", LineStyle::CommandEcho),
        (r"(?i)\bERROR\b|\bSEVERE\b", LineStyle::Error),
        (r"(?i)\bWARN(ING)?\b", LineStyle::Warning),
        (r"Done \(\d", LineStyle::Ready),
        (r"^\[[\d:]+\] \[Server thread/INFO\]", LineStyle::Info),
    ]
    .into_iter()
    .map(|(pattern, style)| (Regex::new(pattern).expect("valid style pattern"), style))
    .collect()
});

/// Returns the display category of a line.
pub fn classify_style(line: &str) -> LineStyle {
    if is_marker(line) {
        return LineStyle::Marker;
    }
    STYLE_RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(line))
        .map(|(_, style)| *style)
        .unwrap_or(LineStyle::Muted)
}

/// Number of boot milestones.
pub const STARTUP_STEP_COUNT: usize = 4;

/// Fixed milestone labels, in order.
pub const STARTUP_LABELS: [&str; STARTUP_STEP_COUNT] = [
    "Initializing",
    "Downloading files",
    "Generating world",
    "Ready",
];

/// One boot milestone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupStep {
    pub label: &'static str,
    pub detail: Option<String>,
    pub done: bool,
}

/// What a matching startup rule does to the milestones.
#[derive(Debug, Clone, Copy)]
enum StartupRule {
    /// Marks every milestone before `index` done, optionally replacing the
    /// detail text of milestone `index`.
    Activate {
        index: usize,
        detail: Option<&'static str>,
    },
    /// Marks every milestone done.
    Complete,
}

static STARTUP_RULES: Lazy<Vec<(Regex, StartupRule)>> = Lazy::new(|| {
    [
        (
            r"Resolving type|Resolving version",
            StartupRule::Activate {
                index: 0,
                detail: Some("Resolving version..."),
            },
        ),
        (
            r"Downloading",
            StartupRule::Activate {
                index: 1,
                detail: Some("Downloading server jar..."),
            },
        ),
        (
            r"Preparing level|Loading initial chunks|Preparing start region",
            StartupRule::Activate {
                index: 2,
                detail: Some("Generating world..."),
            },
        ),
        (
            r"Loading libraries|Starting Minecraft server|Starting net\.minecraft",
            StartupRule::Activate {
                index: 2,
                detail: None,
            },
        ),
        (r"Done \(\d", StartupRule::Complete),
    ]
    .into_iter()
    .map(|(pattern, rule)| (Regex::new(pattern).expect("valid startup pattern"), rule))
    .collect()
});

/// The four boot milestones of a starting server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupProgress {
    steps: [StartupStep; STARTUP_STEP_COUNT],
}

impl Default for StartupProgress {
    fn default() -> Self {
        Self {
            steps: STARTUP_LABELS.map(|label| StartupStep {
                label,
                detail: None,
                done: false,
            }),
        }
    }
}

impl StartupProgress {
    pub fn steps(&self) -> &[StartupStep] {
        &self.steps
    }

    /// Returns the milestones after observing one log line.
    ///
    /// Milestones only move forward: a line matching an earlier rule never
    /// clears a `done` flag that is already set.
    pub fn advance(&self, line: &str) -> StartupProgress {
        let mut next = self.clone();
        let Some((_, rule)) = STARTUP_RULES.iter().find(|(pattern, _)| pattern.is_match(line))
        else {
            return next;
        };
        match *rule {
            StartupRule::Activate { index, detail } => {
                for step in next.steps.iter_mut().take(index) {
                    step.done = true;
                }
                if let Some(detail) = detail {
                    next.steps[index].detail = Some(detail.to_string());
                }
            }
            StartupRule::Complete => next.complete(),
        }
        next
    }

    /// Returns every milestone to not-done with no detail.
    pub fn reset(&mut self) {
        *self = StartupProgress::default();
    }

    /// Marks every milestone done.
    pub fn complete(&mut self) {
        for step in self.steps.iter_mut() {
            step.done = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.done)
    }

    pub fn done_count(&self) -> usize {
        self.steps.iter().filter(|s| s.done).count()
    }

    /// Whole-number percentage of completed milestones.
    pub fn percent(&self) -> u8 {
        ((self.done_count() as f64 / STARTUP_STEP_COUNT as f64) * 100.0).round() as u8
    }

    /// Index of the first milestone not yet done.
    pub fn active_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.done)
    }

    /// Label of the first milestone not yet done, or "Ready" once all are.
    pub fn active_label(&self) -> &'static str {
        self.active_index()
            .map(|i| self.steps[i].label)
            .unwrap_or(STARTUP_LABELS[STARTUP_STEP_COUNT - 1])
    }
}
