//! Connection state machine for the console channel.
//!
//! The machine is synchronous and owns no I/O. It consumes
//! [`MachineEvent`]s and returns the [`Effect`]s the caller must carry out.
//! Every channel and reconnect timer it asks for gets a fresh id, and every
//! completion event carries the id it was issued for; completions for an id
//! the machine no longer tracks are dropped. This is what keeps a late close
//! from a replaced channel, or a timer that fired while being cancelled, from
//! touching the current connection.

use std::time::Duration;

use chrono::NaiveTime;
use protocol::ServerStatus;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::log::{disconnected_marker, reconnected_marker, reconnecting_marker};

/// Identifies one channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// Identifies one scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Connection state as presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel and none pending.
    #[default]
    Idle,
    /// A channel is being established (credential fetch or socket open).
    Connecting,
    /// Handshake sent; log lines are flowing.
    Open,
    /// The channel dropped; a reconnect may be scheduled.
    Closed,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    /// A lifecycle status push (changed or not).
    StatusChanged(ServerStatus),
    /// The credential request for `channel` finished. `None` means no
    /// credential was available.
    CredentialReady {
        channel: ChannelId,
        token: Option<String>,
    },
    ChannelOpened(ChannelId),
    ChannelClosed(ChannelId),
    ReconnectDue(TimerId),
    /// The session is going away.
    Teardown,
}

/// Work requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireCredential(ChannelId),
    OpenChannel(ChannelId),
    SendHandshake { channel: ChannelId, token: String },
    CloseChannel(ChannelId),
    ScheduleReconnect { timer: TimerId, delay: Duration },
    CancelReconnect(TimerId),
    ClearLog,
    AppendMarker(String),
}

/// The console channel's connection state machine.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    status: Option<ServerStatus>,
    /// Channel currently being established or open.
    active: Option<ChannelId>,
    /// Credential held between acquisition and open.
    token: Option<String>,
    pending_reconnect: Option<TimerId>,
    policy: ReconnectPolicy,
    next_id: u64,
    torn_down: bool,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            status: None,
            active: None,
            token: None,
            pending_reconnect: None,
            policy,
            next_id: 1,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last status pushed into the machine.
    pub fn status(&self) -> Option<ServerStatus> {
        self.status
    }

    /// The channel that is currently open, if any.
    pub fn open_channel(&self) -> Option<ChannelId> {
        match self.state {
            ConnectionState::Open => self.active,
            _ => None,
        }
    }

    /// Returns whether `channel` is the channel being tracked.
    pub fn is_current(&self, channel: ChannelId) -> bool {
        self.active == Some(channel)
    }

    /// Pending reconnect timer, if any.
    pub fn pending_reconnect(&self) -> Option<TimerId> {
        self.pending_reconnect
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn is_live(&self) -> bool {
        self.status.is_some_and(|s| s.is_live())
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Applies one event. `now` stamps any marker line produced.
    pub fn handle(&mut self, event: MachineEvent, now: NaiveTime) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.torn_down {
            debug!(?event, "Ignoring event after teardown");
            return effects;
        }

        match event {
            MachineEvent::StatusChanged(status) => {
                self.status = Some(status);
                if status.is_live() {
                    self.connect(&mut effects);
                } else {
                    self.release(&mut effects, Some(now));
                }
            }
            MachineEvent::CredentialReady { channel, token } => {
                if self.active != Some(channel) || self.state != ConnectionState::Connecting {
                    debug!(?channel, "Dropping credential for superseded channel");
                    return effects;
                }
                match token {
                    Some(token) => {
                        self.token = Some(token);
                        effects.push(Effect::OpenChannel(channel));
                    }
                    None => {
                        // Retried on the next status push.
                        warn!("No credential available, console channel not opened");
                        self.active = None;
                        self.state = if self.policy.is_reconnecting() {
                            ConnectionState::Closed
                        } else {
                            ConnectionState::Idle
                        };
                    }
                }
            }
            MachineEvent::ChannelOpened(channel) => {
                if self.active != Some(channel) {
                    debug!(?channel, "Closing channel that opened after being replaced");
                    effects.push(Effect::CloseChannel(channel));
                    return effects;
                }
                if self.state == ConnectionState::Open {
                    return effects;
                }
                let Some(token) = self.token.take() else {
                    warn!(?channel, "Channel opened without a credential");
                    return effects;
                };
                effects.push(Effect::SendHandshake { channel, token });
                if self.policy.is_reconnecting() {
                    info!(attempt = self.policy.attempt(), "Console channel reconnected");
                    effects.push(Effect::AppendMarker(reconnected_marker(now)));
                } else {
                    info!("Console channel connected");
                    effects.push(Effect::ClearLog);
                }
                self.policy.reset();
                self.state = ConnectionState::Open;
            }
            MachineEvent::ChannelClosed(channel) => {
                if self.active != Some(channel) {
                    debug!(?channel, "Ignoring close of superseded channel");
                    return effects;
                }
                self.active = None;
                self.token = None;
                self.state = ConnectionState::Closed;
                if self.is_live() {
                    let (attempt, delay) = self.policy.record_failure();
                    let timer = TimerId(self.allocate());
                    info!(attempt, delay_ms = delay.as_millis() as u64, "Console channel dropped, scheduling reconnect");
                    self.pending_reconnect = Some(timer);
                    effects.push(Effect::AppendMarker(reconnecting_marker(attempt, now, delay)));
                    effects.push(Effect::ScheduleReconnect { timer, delay });
                } else {
                    info!("Console channel closed");
                    effects.push(Effect::AppendMarker(disconnected_marker(now)));
                }
            }
            MachineEvent::ReconnectDue(timer) => {
                if self.pending_reconnect != Some(timer) {
                    debug!(?timer, "Ignoring cancelled reconnect timer");
                    return effects;
                }
                self.pending_reconnect = None;
                if self.is_live() {
                    self.connect(&mut effects);
                }
            }
            MachineEvent::Teardown => {
                self.release(&mut effects, None);
                self.state = ConnectionState::Idle;
                self.torn_down = true;
            }
        }
        effects
    }

    /// Starts a connection attempt unless one is open, opening or scheduled.
    fn connect(&mut self, effects: &mut Vec<Effect>) {
        if self.active.is_some() || self.pending_reconnect.is_some() {
            return;
        }
        let channel = ChannelId(self.allocate());
        debug!(?channel, "Connecting console channel");
        self.active = Some(channel);
        self.token = None;
        self.state = ConnectionState::Connecting;
        effects.push(Effect::AcquireCredential(channel));
    }

    /// Drops the channel and any pending reconnect.
    ///
    /// The channel is forgotten before its close is requested, so the close
    /// event it produces is stale on arrival. When `marker_at` is set and the
    /// channel was open, the disconnect marker is appended here instead.
    fn release(&mut self, effects: &mut Vec<Effect>, marker_at: Option<NaiveTime>) {
        if let Some(timer) = self.pending_reconnect.take() {
            effects.push(Effect::CancelReconnect(timer));
        }
        let was_open = self.state == ConnectionState::Open;
        if let Some(channel) = self.active.take() {
            self.token = None;
            effects.push(Effect::CloseChannel(channel));
            if was_open {
                if let Some(at) = marker_at {
                    effects.push(Effect::AppendMarker(disconnected_marker(at)));
                }
            }
        }
        self.policy.reset();
        self.state = match self.state {
            ConnectionState::Open | ConnectionState::Closed => ConnectionState::Closed,
            ConnectionState::Idle | ConnectionState::Connecting => ConnectionState::Idle,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    /// Drives the machine from nothing to an open channel.
    fn open(machine: &mut ConnectionMachine, status: ServerStatus) -> ChannelId {
        let effects = machine.handle(MachineEvent::StatusChanged(status), noon());
        let channel = match effects.as_slice() {
            [Effect::AcquireCredential(id)] => *id,
            other => panic!("unexpected effects: {:?}", other),
        };
        let effects = machine.handle(
            MachineEvent::CredentialReady {
                channel,
                token: Some("jwt".into()),
            },
            noon(),
        );
        assert_eq!(effects, vec![Effect::OpenChannel(channel)]);
        machine.handle(MachineEvent::ChannelOpened(channel), noon());
        channel
    }

    fn scheduled(effects: &[Effect]) -> (TimerId, Duration) {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::ScheduleReconnect { timer, delay } => Some((*timer, *delay)),
                _ => None,
            })
            .expect("reconnect scheduled")
    }

    #[test]
    fn test_idle_until_live() {
        let mut machine = ConnectionMachine::default();
        for status in [ServerStatus::Installing, ServerStatus::Stopped, ServerStatus::Error] {
            let effects = machine.handle(MachineEvent::StatusChanged(status), noon());
            assert!(effects.is_empty());
            assert_eq!(machine.state(), ConnectionState::Idle);
        }
    }

    #[test]
    fn test_first_open_sends_handshake_and_clears_log() {
        let mut machine = ConnectionMachine::default();
        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Starting), noon());
        let channel = match effects[..] {
            [Effect::AcquireCredential(id)] => id,
            _ => panic!("{:?}", effects),
        };
        assert_eq!(machine.state(), ConnectionState::Connecting);
        machine.handle(
            MachineEvent::CredentialReady {
                channel,
                token: Some("jwt".into()),
            },
            noon(),
        );
        let effects = machine.handle(MachineEvent::ChannelOpened(channel), noon());
        assert_eq!(
            effects,
            vec![
                Effect::SendHandshake {
                    channel,
                    token: "jwt".into()
                },
                Effect::ClearLog,
            ]
        );
        assert_eq!(machine.state(), ConnectionState::Open);
        assert_eq!(machine.open_channel(), Some(channel));
    }

    #[test]
    fn test_repeated_live_status_does_not_reopen() {
        let mut machine = ConnectionMachine::default();
        open(&mut machine, ServerStatus::Starting);
        assert!(machine
            .handle(MachineEvent::StatusChanged(ServerStatus::Running), noon())
            .is_empty());
        assert!(machine
            .handle(MachineEvent::StatusChanged(ServerStatus::Running), noon())
            .is_empty());
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn test_status_push_while_connecting_is_noop() {
        let mut machine = ConnectionMachine::default();
        machine.handle(MachineEvent::StatusChanged(ServerStatus::Running), noon());
        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Running), noon());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_missing_credential_retries_on_next_push() {
        let mut machine = ConnectionMachine::default();
        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Running), noon());
        let Effect::AcquireCredential(first) = effects[0] else {
            panic!("{:?}", effects)
        };
        let effects = machine.handle(
            MachineEvent::CredentialReady {
                channel: first,
                token: None,
            },
            noon(),
        );
        assert!(effects.is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);

        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Running), noon());
        let Effect::AcquireCredential(second) = effects[0] else {
            panic!("{:?}", effects)
        };
        assert_ne!(first, second);
    }

    #[test]
    fn test_unexpected_close_schedules_backoff() {
        let mut machine = ConnectionMachine::default();
        let channel = open(&mut machine, ServerStatus::Running);
        let at = NaiveTime::from_hms_opt(8, 30, 15).unwrap();
        let effects = machine.handle(MachineEvent::ChannelClosed(channel), at);
        let (timer, delay) = scheduled(&effects);
        assert_eq!(delay, Duration::from_secs(2));
        assert_eq!(
            effects[0],
            Effect::AppendMarker(
                "\u{2014} disconnected at 08:30:15 \u{2014} reconnecting in 2s...".into()
            )
        );
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert_eq!(machine.pending_reconnect(), Some(timer));

        // Timer fires: a new attempt starts.
        let effects = machine.handle(MachineEvent::ReconnectDue(timer), at);
        let Effect::AcquireCredential(next) = effects[0] else {
            panic!("{:?}", effects)
        };
        assert_ne!(next, channel);
    }

    #[test]
    fn test_backoff_grows_then_resets_on_open() {
        let mut machine = ConnectionMachine::default();
        let mut channel = open(&mut machine, ServerStatus::Running);
        let mut delays = Vec::new();
        for attempt in 1..=3 {
            let effects = machine.handle(MachineEvent::ChannelClosed(channel), noon());
            let (timer, delay) = scheduled(&effects);
            delays.push(delay.as_millis());
            if attempt > 1 {
                assert!(matches!(
                    &effects[0],
                    Effect::AppendMarker(m) if m.starts_with(&format!("\u{2014} reconnect attempt {} at", attempt))
                ));
            }
            let effects = machine.handle(MachineEvent::ReconnectDue(timer), noon());
            let Effect::AcquireCredential(next) = effects[0] else {
                panic!("{:?}", effects)
            };
            channel = next;
            machine.handle(
                MachineEvent::CredentialReady {
                    channel,
                    token: Some("jwt".into()),
                },
                noon(),
            );
        }
        assert_eq!(delays, vec![2_000, 4_000, 8_000]);

        let effects = machine.handle(MachineEvent::ChannelOpened(channel), noon());
        assert_eq!(
            effects[1],
            Effect::AppendMarker("\u{2014} reconnected at 12:00:00 \u{2014}".into())
        );
        assert!(!effects.contains(&Effect::ClearLog));
        assert_eq!(machine.policy().attempt(), 0);
        assert_eq!(machine.policy().delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_leaving_live_closes_with_marker_and_ignores_late_close() {
        let mut machine = ConnectionMachine::default();
        let channel = open(&mut machine, ServerStatus::Running);
        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Stopping), noon());
        assert_eq!(
            effects,
            vec![
                Effect::CloseChannel(channel),
                Effect::AppendMarker("\u{2014} disconnected at 12:00:00 \u{2014}".into()),
            ]
        );
        assert_eq!(machine.state(), ConnectionState::Closed);

        // The close produced by our own request is stale.
        let effects = machine.handle(MachineEvent::ChannelClosed(channel), noon());
        assert!(effects.is_empty());
        assert!(machine.pending_reconnect().is_none());
    }

    #[test]
    fn test_late_close_of_replaced_channel_leaves_new_one_alone() {
        let mut machine = ConnectionMachine::default();
        let first = open(&mut machine, ServerStatus::Running);
        machine.handle(MachineEvent::StatusChanged(ServerStatus::Stopped), noon());
        let second = open(&mut machine, ServerStatus::Running);
        assert_ne!(first, second);

        let effects = machine.handle(MachineEvent::ChannelClosed(first), noon());
        assert!(effects.is_empty());
        assert_eq!(machine.state(), ConnectionState::Open);
        assert_eq!(machine.open_channel(), Some(second));
        assert!(machine.pending_reconnect().is_none());

        let effects = machine.handle(MachineEvent::ChannelClosed(second), noon());
        let (_, delay) = scheduled(&effects);
        assert_eq!(delay, Duration::from_millis(2000));
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_leaving_live_cancels_pending_reconnect() {
        let mut machine = ConnectionMachine::default();
        let channel = open(&mut machine, ServerStatus::Running);
        let effects = machine.handle(MachineEvent::ChannelClosed(channel), noon());
        let (timer, _) = scheduled(&effects);

        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Stopped), noon());
        assert_eq!(effects, vec![Effect::CancelReconnect(timer)]);
        assert_eq!(machine.policy().attempt(), 0);

        // Fired anyway before the cancel landed.
        assert!(machine
            .handle(MachineEvent::ReconnectDue(timer), noon())
            .is_empty());
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_stale_open_is_closed() {
        let mut machine = ConnectionMachine::default();
        machine.handle(MachineEvent::StatusChanged(ServerStatus::Running), noon());
        let stale = ChannelId(999);
        let effects = machine.handle(MachineEvent::ChannelOpened(stale), noon());
        assert_eq!(effects, vec![Effect::CloseChannel(stale)]);
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_duplicate_open_is_noop() {
        let mut machine = ConnectionMachine::default();
        let channel = open(&mut machine, ServerStatus::Running);
        assert!(machine
            .handle(MachineEvent::ChannelOpened(channel), noon())
            .is_empty());
    }

    #[test]
    fn test_credential_after_status_left_live_is_dropped() {
        let mut machine = ConnectionMachine::default();
        let effects = machine.handle(MachineEvent::StatusChanged(ServerStatus::Starting), noon());
        let Effect::AcquireCredential(channel) = effects[0] else {
            panic!("{:?}", effects)
        };
        machine.handle(MachineEvent::StatusChanged(ServerStatus::Stopped), noon());
        let effects = machine.handle(
            MachineEvent::CredentialReady {
                channel,
                token: Some("jwt".into()),
            },
            noon(),
        );
        assert!(effects.is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_close_while_not_live_appends_plain_marker() {
        let mut machine = ConnectionMachine::default();
        let channel = open(&mut machine, ServerStatus::Running);
        // Close racing a status push that only updated the stored status.
        machine.status = Some(ServerStatus::Stopping);
        let effects = machine.handle(MachineEvent::ChannelClosed(channel), noon());
        assert_eq!(
            effects,
            vec![Effect::AppendMarker(
                "\u{2014} disconnected at 12:00:00 \u{2014}".into()
            )]
        );
        assert!(machine.pending_reconnect().is_none());
    }

    #[test]
    fn test_teardown_releases_everything_and_ignores_rest() {
        let mut machine = ConnectionMachine::default();
        let channel = open(&mut machine, ServerStatus::Running);
        let effects = machine.handle(MachineEvent::Teardown, noon());
        assert_eq!(effects, vec![Effect::CloseChannel(channel)]);
        assert!(machine.is_torn_down());
        assert!(machine
            .handle(MachineEvent::StatusChanged(ServerStatus::Running), noon())
            .is_empty());
        assert!(machine
            .handle(MachineEvent::ChannelClosed(channel), noon())
            .is_empty());
    }
}
