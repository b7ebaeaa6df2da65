use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use super::machine::{ConnectionMachine, Effect, LinkId, TimerToken};
use super::{
    ABNORMAL_CLOSURE, ConnectionEvent, ConnectionState, Connector, Link, LinkCommand, LinkEvent,
    NORMAL_CLOSURE, RetryPolicy,
};
use crate::error::{ConnectError, SessionError};

/// Commands accepted by the connection manager task.
#[derive(Debug)]
enum ConnectionCommand {
    Open {
        respond_to: oneshot::Sender<()>,
    },
    Send {
        frame: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    Close {
        code: u16,
        reason: String,
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the connection manager task.
///
/// All mutation of the connection goes through here, so transitions are
/// serialized by the task no matter how many handles exist.
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Start connecting. No-op while already `Open` or `Connecting`.
    pub async fn open(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Open { respond_to: tx })
            .await
            .map_err(|_| SessionError::ConnectionGone)?;
        rx.await.map_err(|_| SessionError::ConnectionGone)
    }

    /// Write one text frame. Fails with `NotConnected` unless `Open`.
    pub async fn send(&self, frame: String) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Send {
                frame,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ConnectionGone)?;
        rx.await.map_err(|_| SessionError::ConnectionGone)?
    }

    /// Close on purpose. No reconnect follows.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Close {
                code,
                reason: reason.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ConnectionGone)?;
        rx.await.map_err(|_| SessionError::ConnectionGone)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the current state. Intermediate states may be skipped; use the
    /// event stream to see every transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

struct ActiveLink {
    id: LinkId,
    outbound: mpsc::UnboundedSender<LinkCommand>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

type DialResult = (LinkId, Result<Link, ConnectError>);

/// Task that owns the one connection, its state machine and the backoff
/// timer.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    machine: ConnectionMachine,
    connect_timeout: Duration,
    link: Option<ActiveLink>,
    commands: mpsc::Receiver<ConnectionCommand>,
    dial_tx: mpsc::UnboundedSender<DialResult>,
    dial_rx: mpsc::UnboundedReceiver<DialResult>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    retry_timer: Pin<Box<Sleep>>,
    armed: Option<TimerToken>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Spawn the manager on the current runtime. Starts `Idle`.
    ///
    /// Events arrive on the returned receiver in the order they happen. The
    /// task stops once every handle is dropped.
    pub fn spawn(
        connector: Arc<C>,
        policy: RetryPolicy,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let manager = Self {
            connector,
            connect_timeout: policy.connect_timeout,
            machine: ConnectionMachine::new(policy),
            link: None,
            commands: cmd_rx,
            dial_tx,
            dial_rx,
            events: event_tx,
            state_tx,
            retry_timer: Box::pin(tokio::time::sleep(Duration::ZERO)),
            armed: None,
        };
        tokio::spawn(manager.run());

        (
            ConnectionHandle {
                sender: cmd_tx,
                state: state_rx,
            },
            event_rx,
        )
    }

    async fn run(mut self) {
        debug!("connection manager started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }

                Some((id, result)) = self.dial_rx.recv() => {
                    self.handle_dial(id, result);
                }

                event = next_link_event(&mut self.link) => {
                    self.handle_link_event(event);
                }

                () = &mut self.retry_timer, if self.armed.is_some() => {
                    if let Some(token) = self.armed.take() {
                        let effects = self.machine.retry_due(token);
                        self.apply(effects);
                    }
                }
            }
        }

        // Every handle is gone: hang up without scheduling anything.
        let effects = self.machine.close(NORMAL_CLOSURE, "connection manager dropped");
        self.apply(effects);
        debug!("connection manager stopped");
    }

    fn handle_command(&mut self, cmd: ConnectionCommand) {
        match cmd {
            ConnectionCommand::Open { respond_to } => {
                let effects = self.machine.open();
                self.apply(effects);
                let _ = respond_to.send(());
            }
            ConnectionCommand::Send { frame, respond_to } => {
                let _ = respond_to.send(self.write(frame));
            }
            ConnectionCommand::Close {
                code,
                reason,
                respond_to,
            } => {
                let effects = self.machine.close(code, &reason);
                self.apply(effects);
                let _ = respond_to.send(());
            }
        }
    }

    fn write(&mut self, frame: String) -> Result<(), SessionError> {
        if self.machine.state() != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(SessionError::NotConnected)?;
        debug!(bytes = frame.len(), "sending frame");
        link.outbound
            .send(LinkCommand::Text(frame))
            .map_err(|_| SessionError::NotConnected)
    }

    fn handle_dial(&mut self, id: LinkId, result: Result<Link, ConnectError>) {
        if self.machine.current_link() != Some(id) {
            debug!(?id, "discarding superseded connection attempt");
            if let Ok(link) = result {
                let _ = link.outbound.send(LinkCommand::Close {
                    code: NORMAL_CLOSURE,
                    reason: "superseded".to_string(),
                });
            }
            return;
        }
        let effects = match result {
            Ok(link) => {
                info!(?id, "connected");
                self.link = Some(ActiveLink {
                    id,
                    outbound: link.outbound,
                    inbound: link.inbound,
                });
                self.machine.connected(id)
            }
            Err(e) => {
                warn!(?id, error = %e, "connection attempt failed");
                self.machine.dropped(id, ABNORMAL_CLOSURE, &e.to_string())
            }
        };
        self.apply(effects);
    }

    fn handle_link_event(&mut self, event: Option<LinkEvent>) {
        let Some(id) = self.link.as_ref().map(|l| l.id) else {
            return;
        };
        match event {
            Some(LinkEvent::Text(frame)) => {
                let _ = self.events.send(ConnectionEvent::Frame(frame));
            }
            Some(LinkEvent::Closed { code, reason }) => {
                self.link = None;
                let effects = self.machine.dropped(id, code, &reason);
                self.apply(effects);
            }
            None => {
                self.link = None;
                let effects = self.machine.dropped(id, ABNORMAL_CLOSURE, "link dropped");
                self.apply(effects);
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dial(id) => {
                    let attempt = self.connector.connect();
                    let limit = self.connect_timeout;
                    let dial_tx = self.dial_tx.clone();
                    tokio::spawn(async move {
                        let result = tokio::time::timeout(limit, attempt)
                            .await
                            .unwrap_or_else(|_| {
                                Err(ConnectError::Handshake(format!(
                                    "no response after {}ms",
                                    limit.as_millis()
                                )))
                            });
                        let _ = dial_tx.send((id, result));
                    });
                }
                Effect::Arm { token, delay } => {
                    self.retry_timer.as_mut().reset(Instant::now() + delay);
                    self.armed = Some(token);
                }
                Effect::Disarm => {
                    self.armed = None;
                }
                Effect::Hangup { link, code, reason } => {
                    if let Some(active) = self.link.take() {
                        debug_assert_eq!(active.id, link);
                        let _ = active.outbound.send(LinkCommand::Close { code, reason });
                    }
                }
                Effect::Emit(event) => {
                    if let ConnectionEvent::StateChanged(state) = &event {
                        self.state_tx.send_replace(*state);
                    }
                    let _ = self.events.send(event);
                }
            }
        }
    }
}

async fn next_link_event(link: &mut Option<ActiveLink>) -> Option<LinkEvent> {
    match link {
        Some(active) => active.inbound.recv().await,
        None => std::future::pending().await,
    }
}
