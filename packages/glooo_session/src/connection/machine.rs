use std::time::Duration;
use tracing::{debug, error, warn};

use super::{ConnectionEvent, ConnectionState, RetryPolicy};

/// Identifies one connection attempt. Reports carrying an older id are stale.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct LinkId(pub u64);

/// Identifies one armed backoff timer. Firings with an older token are stale.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TimerToken(pub u64);

/// Side effects the driver must carry out, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Start a connection attempt tagged `LinkId`.
    Dial(LinkId),
    /// (Re)arm the single backoff timer.
    Arm { token: TimerToken, delay: Duration },
    /// Cancel the backoff timer.
    Disarm,
    /// Close the live link with a close frame.
    Hangup {
        link: LinkId,
        code: u16,
        reason: String,
    },
    Emit(ConnectionEvent),
}

/// Connection state machine with retry counter and timer bookkeeping.
///
/// Every input returns the effects to perform; nothing here blocks or
/// touches the network, so the transitions are deterministic.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: RetryPolicy,
    /// Consecutive failed attempts since the last successful open.
    retries: u32,
    link: Option<LinkId>,
    next_link: u64,
    timer: Option<TimerToken>,
    next_timer: u64,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            retries: 0,
            link: None,
            next_link: 0,
            timer: None,
            next_timer: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The attempt that reports are currently accepted from.
    pub fn current_link(&self) -> Option<LinkId> {
        self.link
    }

    /// Owner asks for a connection. No-op while `Open` or `Connecting`.
    ///
    /// From `Backoff` the pending timer is cancelled and the attempt starts
    /// now, keeping the retry count. From `Idle` or `Exhausted` the count
    /// starts over.
    pub fn open(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                debug!(state = %self.state, "open() ignored");
                return effects;
            }
            ConnectionState::Backoff { .. } => {}
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Exhausted => {
                self.retries = 0;
            }
        }
        self.disarm(&mut effects);
        self.dial(&mut effects);
        effects
    }

    /// The attempt `link` completed its handshake.
    pub fn connected(&mut self, link: LinkId) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link != Some(link) || self.state != ConnectionState::Connecting {
            debug!(?link, "stale handshake ignored");
            return effects;
        }
        self.retries = 0;
        self.transition(ConnectionState::Open, &mut effects);
        effects.push(Effect::Emit(ConnectionEvent::Opened));
        effects
    }

    /// The attempt `link` failed or the open link went away without the
    /// owner asking for it.
    pub fn dropped(&mut self, link: LinkId, code: u16, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link != Some(link) {
            debug!(?link, code, "stale closure ignored");
            return effects;
        }
        self.link = None;
        warn!(code, reason, state = %self.state, "connection closed unexpectedly");
        effects.push(Effect::Emit(ConnectionEvent::Closed {
            code,
            reason: reason.to_string(),
            expected: false,
        }));

        if self.retries < self.policy.max_retries {
            let attempt = self.retries;
            let delay = self.policy.delay_for(attempt);
            self.retries += 1;
            self.next_timer += 1;
            let token = TimerToken(self.next_timer);
            self.timer = Some(token);
            self.transition(ConnectionState::Backoff { attempt }, &mut effects);
            debug!(attempt, ?delay, "scheduling reconnect");
            effects.push(Effect::Arm { token, delay });
        } else {
            error!(attempts = self.retries, "max reconnection attempts reached");
            self.transition(ConnectionState::Exhausted, &mut effects);
            effects.push(Effect::Emit(ConnectionEvent::Exhausted {
                attempts: self.retries,
            }));
        }
        effects
    }

    /// The backoff timer armed with `token` fired.
    pub fn retry_due(&mut self, token: TimerToken) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.timer != Some(token) || !matches!(self.state, ConnectionState::Backoff { .. }) {
            debug!(?token, "stale timer ignored");
            return effects;
        }
        self.timer = None;
        self.dial(&mut effects);
        effects
    }

    /// Owner-requested closure. Never followed by a retry.
    pub fn close(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            ConnectionState::Open
            | ConnectionState::Connecting
            | ConnectionState::Backoff { .. } => {}
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Exhausted => {
                debug!(state = %self.state, "close() ignored");
                return effects;
            }
        }
        self.disarm(&mut effects);
        self.transition(ConnectionState::Closing, &mut effects);
        if let Some(link) = self.link.take() {
            effects.push(Effect::Hangup {
                link,
                code,
                reason: reason.to_string(),
            });
        }
        self.transition(ConnectionState::Idle, &mut effects);
        effects.push(Effect::Emit(ConnectionEvent::Closed {
            code,
            reason: reason.to_string(),
            expected: true,
        }));
        effects
    }

    fn dial(&mut self, effects: &mut Vec<Effect>) {
        self.next_link += 1;
        let link = LinkId(self.next_link);
        self.link = Some(link);
        self.transition(ConnectionState::Connecting, effects);
        effects.push(Effect::Dial(link));
    }

    fn disarm(&mut self, effects: &mut Vec<Effect>) {
        if self.timer.take().is_some() {
            effects.push(Effect::Disarm);
        }
    }

    fn transition(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
        effects.push(Effect::Emit(ConnectionEvent::StateChanged(next)));
    }
}
