//! Time-based install progress estimate.
//!
//! Provisioning happens out of band and reports nothing but its start time,
//! so progress is a pure function of how long ago the server was created:
//! one of five phases per [`PHASE_SECS`] seconds, saturating at the last.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Seconds covered by one install phase.
pub const PHASE_SECS: u64 = 18;

/// One install phase as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallStep {
    pub label: &'static str,
    pub hint: &'static str,
}

/// The install phases, in order.
pub const INSTALL_STEPS: [InstallStep; 5] = [
    InstallStep {
        label: "Creating LXC container",
        hint: "Allocating isolated environment...",
    },
    InstallStep {
        label: "Installing Java runtime",
        hint: "apt-get install openjdk-17-jre-headless openjdk-21-jre-headless",
    },
    InstallStep {
        label: "Downloading server jar",
        hint: "Fetching from Mojang...",
    },
    InstallStep {
        label: "Registering systemd service",
        hint: "Writing /etc/systemd/system/mc-*",
    },
    InstallStep {
        label: "Starting Minecraft",
        hint: "Launching server process...",
    },
];

/// Index of the last phase.
pub const LAST_PHASE: usize = INSTALL_STEPS.len() - 1;

/// Current estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallProgress {
    pub phase: usize,
    pub elapsed_secs: u64,
}

/// Milliseconds since `created_at`, never negative.
fn elapsed_ms(created_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - created_at).num_milliseconds().max(0) as u64
}

/// Estimates install progress for a server created at `created_at`.
pub fn estimate(created_at: DateTime<Utc>, now: DateTime<Utc>) -> InstallProgress {
    let elapsed_secs = elapsed_ms(created_at, now) / 1000;
    InstallProgress {
        phase: ((elapsed_secs / PHASE_SECS) as usize).min(LAST_PHASE),
        elapsed_secs,
    }
}

/// Time until the next phase boundary.
pub fn until_next_phase(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let phase_ms = PHASE_SECS * 1000;
    Duration::from_millis(phase_ms - elapsed_ms(created_at, now) % phase_ms)
}

/// Formats seconds as `m:ss`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

impl InstallProgress {
    pub fn step(&self) -> &'static InstallStep {
        &INSTALL_STEPS[self.phase.min(LAST_PHASE)]
    }

    /// Fill fraction of the progress bar, in `0.0..=1.0`.
    pub fn bar_fraction(&self) -> f64 {
        (self.phase as f64 + 0.5) / INSTALL_STEPS.len() as f64
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_secs)
    }

    pub fn is_done(&self, index: usize) -> bool {
        index < self.phase
    }

    pub fn is_active(&self, index: usize) -> bool {
        index == self.phase
    }
}

/// Timing for the clocks that drive a running install estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallSchedule {
    /// Tag carried by tick/advance events for this run of the clocks.
    pub generation: u64,
    /// Delay until the first phase boundary; later ones follow every
    /// [`PHASE_SECS`].
    pub first_advance: Duration,
}

/// Live install estimate driven by a 1 s tick and a phase-boundary timer.
///
/// Each start hands out a new generation; tick and advance events carrying an
/// older one are ignored, so clocks left over from a previous install run have
/// no effect.
#[derive(Debug, Clone, Default)]
pub struct InstallTracker {
    origin: Option<DateTime<Utc>>,
    progress: InstallProgress,
    generation: u64,
}

impl InstallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> InstallProgress {
        self.progress
    }

    pub fn is_running(&self) -> bool {
        self.origin.is_some()
    }

    /// Starts (or restarts) tracking. Without a creation time the estimate
    /// counts from `now`.
    pub fn start(&mut self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> InstallSchedule {
        let origin = created_at.unwrap_or(now);
        self.origin = Some(origin);
        self.progress = estimate(origin, now);
        self.generation += 1;
        InstallSchedule {
            generation: self.generation,
            first_advance: until_next_phase(origin, now),
        }
    }

    /// Refreshes the elapsed time. Returns whether the event was current.
    pub fn tick(&mut self, generation: u64, now: DateTime<Utc>) -> bool {
        match self.origin {
            Some(origin) if generation == self.generation => {
                self.progress.elapsed_secs = estimate(origin, now).elapsed_secs;
                true
            }
            _ => false,
        }
    }

    /// Moves to the next phase at a phase boundary. Returns whether the event
    /// was current.
    pub fn advance(&mut self, generation: u64, now: DateTime<Utc>) -> bool {
        match self.origin {
            Some(origin) if generation == self.generation => {
                // Catch up if boundaries were missed (suspended host).
                let estimated = estimate(origin, now);
                self.progress.phase = (self.progress.phase + 1)
                    .max(estimated.phase)
                    .min(LAST_PHASE);
                self.progress.elapsed_secs = estimated.elapsed_secs;
                true
            }
            _ => false,
        }
    }

    /// Stops tracking and zeroes the estimate.
    pub fn stop(&mut self) {
        self.origin = None;
        self.progress = InstallProgress::default();
        self.generation += 1;
    }
}
