//! Async driver for a [`ConsoleSession`].
//!
//! The runner owns the session and a single event queue. Everything that
//! completes asynchronously (credential fetches, channel I/O, timers, the
//! status poller) posts a [`SessionEvent`] into that queue; the runner applies
//! events one at a time and carries out the resulting [`Action`]s. Timers are
//! spawned tasks guarded by a [`CancellationToken`]; cancelling one is
//! immediate, and any event it had already queued is dropped by the session's
//! id checks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::console::{Action, ConsoleSession, SessionEvent};
use super::install::PHASE_SECS;
use super::machine::{ChannelId, TimerId};
use crate::auth::CredentialProvider;
use crate::network::{ChannelEvents, ChannelHandle, ConsoleTransport};

/// Owns a console session and performs its I/O.
pub struct SessionRunner {
    session: ConsoleSession,
    channel_url: Url,
    transport: Arc<dyn ConsoleTransport>,
    credentials: Arc<dyn CredentialProvider>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    channels: HashMap<ChannelId, Box<dyn ChannelHandle>>,
    reconnect_timer: Option<(TimerId, CancellationToken)>,
    install_clock: Option<CancellationToken>,
    shutdown: CancellationToken,
    finished: bool,
}

impl SessionRunner {
    pub fn new(
        session: ConsoleSession,
        channel_url: Url,
        transport: Arc<dyn ConsoleTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session,
            channel_url,
            transport,
            credentials,
            events_tx,
            events_rx,
            channels: HashMap::new(),
            reconnect_timer: None,
            install_clock: None,
            shutdown: CancellationToken::new(),
            finished: false,
        }
    }

    pub fn session(&self) -> &ConsoleSession {
        &self.session
    }

    /// Direct access for command line editing.
    pub fn session_mut(&mut self) -> &mut ConsoleSession {
        &mut self.session
    }

    /// Queue for collaborators (the status poller) to push events into.
    pub fn sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.events_tx.clone()
    }

    /// Cancelled when the runner shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns whether the session ended or was shut down.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Waits for the next queued event and applies it.
    pub async fn step(&mut self) {
        // The runner holds a sender, so the queue never closes.
        if let Some(event) = self.events_rx.recv().await {
            self.dispatch(event);
        }
    }

    /// Applies every event that is already queued, without waiting.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            applied += 1;
        }
        applied
    }

    /// Applies one event and performs the resulting actions.
    pub fn dispatch(&mut self, event: SessionEvent) {
        if let SessionEvent::ChannelClosed(channel) = &event {
            self.channels.remove(channel);
        }
        let actions = self.session.handle(event, Utc::now());
        for action in actions {
            self.execute(action);
        }
    }

    /// Tears the session down: closes the channel and cancels every timer
    /// and collaborator.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.dispatch(SessionEvent::Teardown);
        self.finish();
    }

    fn finish(&mut self) {
        for (_, handle) in self.channels.drain() {
            handle.close();
        }
        if let Some((_, token)) = self.reconnect_timer.take() {
            token.cancel();
        }
        if let Some(token) = self.install_clock.take() {
            token.cancel();
        }
        self.shutdown.cancel();
        self.finished = true;
    }

    fn execute(&mut self, action: Action) {
        debug!(?action, "Executing session action");
        match action {
            Action::AcquireCredential(channel) => {
                let credentials = self.credentials.clone();
                let tx = self.events_tx.clone();
                let cancelled = self.shutdown.child_token();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        biased;
                        _ = cancelled.cancelled() => return,
                        result = credentials.credential() => result,
                    };
                    let token = match result {
                        Ok(token) => Some(token),
                        Err(e) => {
                            debug!("Credential unavailable: {}", e);
                            None
                        }
                    };
                    let _ = tx.send(SessionEvent::Credential { channel, token });
                });
            }
            Action::OpenChannel(channel) => {
                let events = ChannelEvents::new(channel, self.events_tx.clone());
                let handle = self.transport.open(&self.channel_url, events);
                self.channels.insert(channel, handle);
            }
            Action::Send { channel, payload } => match self.channels.get(&channel) {
                Some(handle) => {
                    if let Err(e) = handle.send(payload) {
                        warn!(?channel, "Failed to queue frame: {}", e);
                    }
                }
                None => warn!(?channel, "Send on unknown channel"),
            },
            Action::CloseChannel(channel) => {
                if let Some(handle) = self.channels.remove(&channel) {
                    handle.close();
                }
            }
            Action::ScheduleReconnect { timer, delay } => {
                if let Some((_, previous)) = self.reconnect_timer.take() {
                    previous.cancel();
                }
                let token = self.shutdown.child_token();
                let cancelled = token.clone();
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancelled.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(SessionEvent::ReconnectDue(timer));
                        }
                    }
                });
                self.reconnect_timer = Some((timer, token));
            }
            Action::CancelReconnect(timer) => {
                if let Some((scheduled, token)) = self.reconnect_timer.take() {
                    if scheduled == timer {
                        token.cancel();
                    } else {
                        self.reconnect_timer = Some((scheduled, token));
                    }
                }
            }
            Action::StartInstallClock {
                generation,
                first_advance,
            } => {
                if let Some(previous) = self.install_clock.take() {
                    previous.cancel();
                }
                let token = self.shutdown.child_token();
                spawn_install_clock(generation, first_advance, token.clone(), self.events_tx.clone());
                self.install_clock = Some(token);
            }
            Action::StopInstallClock => {
                if let Some(token) = self.install_clock.take() {
                    token.cancel();
                }
            }
            Action::End => self.finish(),
        }
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the 1 s elapsed tick and the phase-boundary timer.
fn spawn_install_clock(
    generation: u64,
    first_advance: std::time::Duration,
    cancelled: CancellationToken,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let second = std::time::Duration::from_secs(1);
        let mut tick = tokio::time::interval_at(Instant::now() + second, second);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut advance = tokio::time::interval_at(
            Instant::now() + first_advance,
            std::time::Duration::from_secs(PHASE_SECS),
        );
        loop {
            let event = tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = tick.tick() => SessionEvent::InstallTick(generation),
                _ = advance.tick() => SessionEvent::InstallAdvance(generation),
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });
}
