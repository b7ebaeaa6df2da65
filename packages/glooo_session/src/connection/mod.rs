//! The single duplex connection to the chat server and its reconnect policy.
//!
//! [`ConnectionMachine`] holds the state machine and retry counter and does no
//! I/O. [`ConnectionManager`] is the task that owns the machine, the live
//! link and the backoff timer, and is driven through a [`ConnectionHandle`].
//! The transport itself comes from a [`Connector`].

mod machine;
mod manager;

pub use machine::{ConnectionMachine, Effect, LinkId, TimerToken};
pub use manager::{ConnectionHandle, ConnectionManager};

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::ConnectError;

/// Close code for a closure the owner asked for.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code when the peer is going away.
pub const GOING_AWAY: u16 = 1001;
/// Close code used when the link dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    /// Waiting to retry; `attempt` is the zero-based retry number.
    Backoff { attempt: u32 },
    /// Retry ceiling reached. Terminal until `open()` is called again.
    Exhausted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Backoff { attempt } => write!(f, "backoff({})", attempt),
            ConnectionState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Events published by the connection manager, in the order they happen.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Opened,
    /// One raw text frame from the server.
    Frame(String),
    Closed {
        code: u16,
        reason: String,
        /// True when the owner requested the closure.
        expected: bool,
    },
    /// Reported once when the retry ceiling is hit.
    Exhausted { attempts: u32 },
}

/// Reconnect tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// A dial that has not produced a link by then counts as a failed
    /// handshake.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Commands from the manager to an established link.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkCommand {
    Text(String),
    Close { code: u16, reason: String },
}

/// What an established link reports back.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Text(String),
    Closed { code: u16, reason: String },
}

/// An established transport, as a pair of channels.
///
/// The transport side reports `LinkEvent::Closed` when the peer goes away;
/// a dropped `inbound` sender counts as an abnormal closure.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<LinkCommand>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens transports. One call per connection attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>>;
}
