//! Console session: the state behind one displayed server.
//!
//! [`ConsoleSession`] composes the connection machine, the log, the install
//! estimator and the command line. It is driven one [`SessionEvent`] at a
//! time and answers with the [`Action`]s that need I/O; it never performs
//! I/O itself.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use protocol::{ClientMessage, Handshake, ServerMetrics, ServerRecord, ServerStatus};
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::install::{InstallProgress, InstallTracker};
use super::input::{placeholder, CommandInput};
use super::log::LogIngest;
use super::machine::{ChannelId, ConnectionMachine, ConnectionState, Effect, MachineEvent, TimerId};

/// Everything that can happen to a console session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A lifecycle status push.
    Lifecycle {
        status: ServerStatus,
        created_at: Option<DateTime<Utc>>,
    },
    /// A full server record from the lifecycle API.
    Record(ServerRecord),
    /// Metrics refresh; `None` clears them.
    Metrics(Option<ServerMetrics>),
    /// The server no longer exists.
    ServerGone,
    Credential {
        channel: ChannelId,
        token: Option<String>,
    },
    ChannelOpened(ChannelId),
    ChannelFrame {
        channel: ChannelId,
        text: String,
    },
    ChannelClosed(ChannelId),
    ReconnectDue(TimerId),
    InstallTick(u64),
    InstallAdvance(u64),
    /// The operator pressed enter.
    Submit,
    Teardown,
}

/// I/O requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AcquireCredential(ChannelId),
    OpenChannel(ChannelId),
    Send { channel: ChannelId, payload: String },
    CloseChannel(ChannelId),
    ScheduleReconnect { timer: TimerId, delay: Duration },
    CancelReconnect(TimerId),
    StartInstallClock { generation: u64, first_advance: Duration },
    StopInstallClock,
    /// The session is over; stop polling.
    End,
}

/// State of one console view.
#[derive(Debug)]
pub struct ConsoleSession {
    server_id: String,
    status: Option<ServerStatus>,
    created_at: Option<DateTime<Utc>>,
    record: Option<ServerRecord>,
    metrics: Option<ServerMetrics>,
    machine: ConnectionMachine,
    log: LogIngest,
    install: InstallTracker,
    input: CommandInput,
    ended: bool,
}

impl ConsoleSession {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self::with_policy(server_id, ReconnectPolicy::default())
    }

    pub fn with_policy(server_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            server_id: server_id.into(),
            status: None,
            created_at: None,
            record: None,
            metrics: None,
            machine: ConnectionMachine::new(policy),
            log: LogIngest::new(),
            install: InstallTracker::new(),
            input: CommandInput::new(),
            ended: false,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn status(&self) -> Option<ServerStatus> {
        self.status
    }

    pub fn record(&self) -> Option<&ServerRecord> {
        self.record.as_ref()
    }

    pub fn metrics(&self) -> Option<&ServerMetrics> {
        self.metrics.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    pub fn log(&self) -> &LogIngest {
        &self.log
    }

    pub fn install(&self) -> InstallProgress {
        self.install.progress()
    }

    pub fn is_installing(&self) -> bool {
        self.status == Some(ServerStatus::Installing)
    }

    pub fn input(&self) -> &CommandInput {
        &self.input
    }

    /// Command line editing. Submission goes through [`SessionEvent::Submit`].
    pub fn input_mut(&mut self) -> &mut CommandInput {
        &mut self.input
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Returns whether commands can be submitted right now.
    pub fn can_input(&self) -> bool {
        self.status == Some(ServerStatus::Running) && self.machine.state() == ConnectionState::Open
    }

    pub fn placeholder(&self) -> &'static str {
        placeholder(self.status, self.can_input())
    }

    /// Connection indicator text.
    pub fn indicator(&self) -> &'static str {
        if self.machine.state() == ConnectionState::Open {
            "\u{25cf} live"
        } else {
            match self.status {
                Some(ServerStatus::Installing) => "\u{25cf} installing",
                Some(ServerStatus::Starting) => "\u{25cf} starting",
                _ => "\u{25cb} offline",
            }
        }
    }

    /// Applies one event at wall-clock time `now`.
    pub fn handle(&mut self, event: SessionEvent, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.ended {
            return actions;
        }

        match event {
            SessionEvent::Lifecycle { status, created_at } => {
                self.apply_lifecycle(status, created_at, now, &mut actions);
            }
            SessionEvent::Record(record) => {
                let (status, created_at) = (record.status, Some(record.created_at));
                self.record = Some(record);
                self.apply_lifecycle(status, created_at, now, &mut actions);
            }
            SessionEvent::Metrics(metrics) => self.metrics = metrics,
            SessionEvent::ServerGone => {
                info!(server_id = %self.server_id, "Server no longer exists, ending session");
                self.teardown(now, &mut actions);
                actions.push(Action::End);
            }
            SessionEvent::Credential { channel, token } => {
                self.apply_machine(MachineEvent::CredentialReady { channel, token }, now, &mut actions);
            }
            SessionEvent::ChannelOpened(channel) => {
                self.apply_machine(MachineEvent::ChannelOpened(channel), now, &mut actions);
            }
            SessionEvent::ChannelFrame { channel, text } => {
                if self.machine.open_channel() == Some(channel) {
                    self.log.ingest_frame(&text);
                } else {
                    debug!(?channel, "Dropping frame from superseded channel");
                }
            }
            SessionEvent::ChannelClosed(channel) => {
                self.apply_machine(MachineEvent::ChannelClosed(channel), now, &mut actions);
            }
            SessionEvent::ReconnectDue(timer) => {
                self.apply_machine(MachineEvent::ReconnectDue(timer), now, &mut actions);
            }
            SessionEvent::InstallTick(generation) => {
                self.install.tick(generation, now);
            }
            SessionEvent::InstallAdvance(generation) => {
                if self.install.advance(generation, now) {
                    debug!(phase = self.install.progress().phase, "Install phase advanced");
                }
            }
            SessionEvent::Submit => self.submit(&mut actions),
            SessionEvent::Teardown => self.teardown(now, &mut actions),
        }
        actions
    }

    fn apply_lifecycle(
        &mut self,
        status: ServerStatus,
        created_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        let previous = self.status.replace(status);
        let created_changed = created_at != self.created_at;
        self.created_at = created_at;

        if previous != Some(status) {
            info!(server_id = %self.server_id, from = ?previous, to = %status, "Server status changed");
            match status {
                ServerStatus::Starting => self.log.startup_mut().reset(),
                ServerStatus::Running => self.log.startup_mut().complete(),
                _ => {}
            }
        }

        if status == ServerStatus::Installing {
            if previous != Some(status) || created_changed || !self.install.is_running() {
                let schedule = self.install.start(created_at, now);
                actions.push(Action::StartInstallClock {
                    generation: schedule.generation,
                    first_advance: schedule.first_advance,
                });
            }
        } else if self.install.is_running() {
            self.install.stop();
            actions.push(Action::StopInstallClock);
        }

        self.apply_machine(MachineEvent::StatusChanged(status), now, actions);
    }

    fn submit(&mut self, actions: &mut Vec<Action>) {
        let Some(channel) = self.machine.open_channel() else {
            return;
        };
        if !self.can_input() {
            return;
        }
        let Some(command) = self.input.take_submission() else {
            return;
        };
        match ClientMessage::command(command).to_json() {
            Ok(payload) => actions.push(Action::Send { channel, payload }),
            Err(e) => warn!("Failed to encode command: {}", e),
        }
    }

    fn teardown(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        if self.install.is_running() {
            self.install.stop();
            actions.push(Action::StopInstallClock);
        }
        self.apply_machine(MachineEvent::Teardown, now, actions);
        self.ended = true;
    }

    /// Feeds the machine and turns its effects into log updates and actions.
    fn apply_machine(&mut self, event: MachineEvent, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let local = now.with_timezone(&Local).time();
        for effect in self.machine.handle(event, local) {
            match effect {
                Effect::ClearLog => self.log.clear(),
                Effect::AppendMarker(marker) => self.log.append_marker(marker),
                Effect::SendHandshake { channel, token } => match Handshake::new(token).to_json() {
                    Ok(payload) => actions.push(Action::Send { channel, payload }),
                    Err(e) => warn!("Failed to encode handshake: {}", e),
                },
                Effect::AcquireCredential(channel) => actions.push(Action::AcquireCredential(channel)),
                Effect::OpenChannel(channel) => actions.push(Action::OpenChannel(channel)),
                Effect::CloseChannel(channel) => actions.push(Action::CloseChannel(channel)),
                Effect::ScheduleReconnect { timer, delay } => {
                    actions.push(Action::ScheduleReconnect { timer, delay })
                }
                Effect::CancelReconnect(timer) => actions.push(Action::CancelReconnect(timer)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::log::is_marker;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn lifecycle(status: ServerStatus) -> SessionEvent {
        SessionEvent::Lifecycle {
            status,
            created_at: Some(t(0)),
        }
    }

    /// Runs the credential/open handshake for the channel the session asked for.
    fn connect(session: &mut ConsoleSession, actions: Vec<Action>, now: DateTime<Utc>) -> ChannelId {
        let channel = actions
            .iter()
            .find_map(|a| match a {
                Action::AcquireCredential(id) => Some(*id),
                _ => None,
            })
            .expect("credential requested");
        let actions = session.handle(
            SessionEvent::Credential {
                channel,
                token: Some("jwt".into()),
            },
            now,
        );
        assert_eq!(actions, vec![Action::OpenChannel(channel)]);
        let actions = session.handle(SessionEvent::ChannelOpened(channel), now);
        assert_eq!(
            actions,
            vec![Action::Send {
                channel,
                payload: r#"{"token":"jwt"}"#.into()
            }]
        );
        channel
    }

    fn frame(channel: ChannelId, line: &str) -> SessionEvent {
        SessionEvent::ChannelFrame {
            channel,
            text: format!(r#"{{"type":"log","line":"{}"}}"#, line),
        }
    }

    #[test]
    fn test_install_clock_started_and_stopped() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Installing), t(40));
        assert_eq!(
            actions,
            vec![Action::StartInstallClock {
                generation: 1,
                first_advance: Duration::from_secs(14)
            }]
        );
        assert_eq!(session.install().phase, 2);
        assert_eq!(session.indicator(), "\u{25cf} installing");

        // Unchanged push does not restart the clocks.
        assert!(session.handle(lifecycle(ServerStatus::Installing), t(45)).is_empty());

        let actions = session.handle(lifecycle(ServerStatus::Starting), t(50));
        assert_eq!(actions[0], Action::StopInstallClock);
        assert!(matches!(actions[1], Action::AcquireCredential(_)));
        assert_eq!(session.install(), InstallProgress::default());
    }

    #[test]
    fn test_frames_reach_log_only_when_open() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Running), t(0));
        let channel = connect(&mut session, actions, t(0));
        session.handle(frame(channel, "hello"), t(1));
        session.handle(frame(ChannelId(999), "ghost"), t(1));
        let lines: Vec<&str> = session.log().buffer().iter().collect();
        assert_eq!(lines, vec!["hello"]);
        assert_eq!(session.indicator(), "\u{25cf} live");
    }

    #[test]
    fn test_submit_gated_on_running_and_open() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Starting), t(0));
        let channel = connect(&mut session, actions, t(0));

        session.input_mut().set_text("list");
        assert!(!session.can_input());
        assert_eq!(session.placeholder(), "Server starting...");
        assert!(session.handle(SessionEvent::Submit, t(1)).is_empty());
        assert_eq!(session.input().text(), "list");

        session.handle(lifecycle(ServerStatus::Running), t(2));
        assert!(session.can_input());
        let actions = session.handle(SessionEvent::Submit, t(3));
        assert_eq!(
            actions,
            vec![Action::Send {
                channel,
                payload: r#"{"type":"command","cmd":"list"}"#.into()
            }]
        );
        assert_eq!(session.input().text(), "");
        assert_eq!(session.input().history().len(), 1);
    }

    #[test]
    fn test_startup_milestones_follow_status() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Starting), t(0));
        let channel = connect(&mut session, actions, t(0));
        session.handle(frame(channel, "Loading libraries, please wait..."), t(1));
        assert_eq!(session.log().startup().done_count(), 2);

        session.handle(lifecycle(ServerStatus::Running), t(2));
        assert!(session.log().startup().is_complete());

        session.handle(lifecycle(ServerStatus::Stopping), t(3));
        session.handle(lifecycle(ServerStatus::Starting), t(4));
        assert_eq!(session.log().startup().done_count(), 0);
    }

    #[test]
    fn test_reconnect_keeps_log_with_markers() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Running), t(0));
        let channel = connect(&mut session, actions, t(0));
        session.handle(frame(channel, "before"), t(1));

        let actions = session.handle(SessionEvent::ChannelClosed(channel), t(2));
        let timer = match actions[..] {
            [Action::ScheduleReconnect { timer, delay }] => {
                assert_eq!(delay, Duration::from_secs(2));
                timer
            }
            _ => panic!("{:?}", actions),
        };
        assert_eq!(session.indicator(), "\u{25cb} offline");

        let actions = session.handle(SessionEvent::ReconnectDue(timer), t(4));
        let channel = connect(&mut session, actions, t(4));
        session.handle(frame(channel, "after"), t(5));

        let lines: Vec<&str> = session.log().buffer().iter().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "before");
        assert!(is_marker(lines[1]) && lines[1].contains("reconnecting in 2s"));
        assert!(is_marker(lines[2]) && lines[2].contains("reconnected at"));
        assert_eq!(lines[3], "after");
    }

    #[test]
    fn test_server_gone_ends_session() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Running), t(0));
        let channel = connect(&mut session, actions, t(0));
        let actions = session.handle(SessionEvent::ServerGone, t(1));
        assert_eq!(actions, vec![Action::CloseChannel(channel), Action::End]);
        assert!(session.is_ended());
        assert!(session.handle(lifecycle(ServerStatus::Running), t(2)).is_empty());
    }

    #[test]
    fn test_teardown_ignores_later_events() {
        let mut session = ConsoleSession::new("srv-1");
        let actions = session.handle(lifecycle(ServerStatus::Running), t(0));
        let channel = connect(&mut session, actions, t(0));
        let actions = session.handle(SessionEvent::Teardown, t(1));
        assert_eq!(actions, vec![Action::CloseChannel(channel)]);
        assert!(session.is_ended());

        assert!(session.handle(lifecycle(ServerStatus::Installing), t(2)).is_empty());
        assert!(!session.is_installing());
        assert!(session.handle(SessionEvent::InstallAdvance(1), t(20)).is_empty());
        assert_eq!(session.install(), InstallProgress::default());
        assert!(session.handle(lifecycle(ServerStatus::Starting), t(3)).is_empty());
        assert!(session.log().startup().is_complete());
    }

    #[test]
    fn test_error_status_shows_offline() {
        let mut session = ConsoleSession::new("srv-1");
        assert!(session.handle(lifecycle(ServerStatus::Error), t(0)).is_empty());
        assert_eq!(session.connection(), ConnectionState::Idle);
        assert_eq!(session.indicator(), "\u{25cb} offline");
        assert_eq!(session.placeholder(), "Server offline");
    }
}
