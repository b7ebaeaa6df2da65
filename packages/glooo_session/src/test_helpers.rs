use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::connection::{
    ConnectionEvent, ConnectionState, Connector, Link, LinkCommand, LinkEvent,
};
use crate::error::ConnectError;

/// Server side of one mock link.
pub struct MockPeer {
    pub to_client: mpsc::UnboundedSender<LinkEvent>,
    pub from_client: mpsc::UnboundedReceiver<LinkCommand>,
}

impl MockPeer {
    pub fn push(&self, frame: &str) {
        let _ = self.to_client.send(LinkEvent::Text(frame.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }
}

#[derive(Default)]
struct Script {
    fail_next: u32,
    stall_next: u32,
    dials: Vec<Instant>,
}

/// In-memory connector. Each successful dial hands its [`MockPeer`] to the
/// test through the receiver returned by [`MockConnector::new`].
pub struct MockConnector {
    script: Mutex<Script>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(Script::default()),
            peers: tx,
        });
        (connector, rx)
    }

    /// Make the next `n` dials fail as if the server were unreachable.
    pub fn fail_next(&self, n: u32) {
        self.script.lock().unwrap().fail_next = n;
    }

    /// Make the next `n` dials hang without ever completing the handshake.
    pub fn stall_next(&self, n: u32) {
        self.script.lock().unwrap().stall_next = n;
    }

    pub fn dial_count(&self) -> usize {
        self.script.lock().unwrap().dials.len()
    }

    pub fn dial_times(&self) -> Vec<Instant> {
        self.script.lock().unwrap().dials.clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>> {
        let mut script = self.script.lock().unwrap();
        script.dials.push(Instant::now());
        if script.fail_next > 0 {
            script.fail_next -= 1;
            return async { Err(ConnectError::Unavailable) }.boxed();
        }
        if script.stall_next > 0 {
            script.stall_next -= 1;
            return futures::future::pending().boxed();
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.peers.send(MockPeer {
            to_client: in_tx,
            from_client: out_rx,
        });
        async move {
            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

/// Next state change, skipping other events.
pub async fn next_state(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionState {
    loop {
        match events.recv().await {
            Some(ConnectionEvent::StateChanged(state)) => return state,
            Some(_) => continue,
            None => panic!("event stream ended"),
        }
    }
}

/// Collect state changes up to and including `target`.
pub async fn states_until(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    target: ConnectionState,
) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    loop {
        let state = next_state(events).await;
        seen.push(state);
        if state == target {
            return seen;
        }
    }
}
