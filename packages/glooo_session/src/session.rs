//! Session orchestration: startup sequencing, inbound routing, sends.

use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionState, NORMAL_CLOSURE};
use crate::directory::ConversationDirectory;
use crate::error::{ApiError, SessionError};
use crate::protocol::{InboundFrame, OutboundFrame, parse_inbound};
use crate::store::MessageStore;
use crate::types::{Conversation, Id, Message};

/// Result of the external session check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub authenticated: bool,
    /// Local user id, when the check response carries it.
    pub user_id: Option<Id>,
}

/// Confirms the user holds a valid session before anything else happens.
pub trait AuthGuard: Send + Sync {
    fn check_session(&self) -> impl Future<Output = Result<SessionStatus, ApiError>> + Send;
}

/// REST collaborator for identity, directory and history.
pub trait ChatApi: Send + Sync {
    fn current_user(&self) -> impl Future<Output = Result<Id, ApiError>> + Send;

    fn conversations(&self) -> impl Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    fn messages(
        &self,
        conversation: &Id,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;
}

/// What the UI should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    MessageReceived {
        conversation_id: Id,
        message: Message,
    },
    StateChanged(ConnectionState),
    /// Reconnection gave up. Reported once per exhaustion.
    ConnectionLost { attempts: u32 },
    /// The server rejected something we sent.
    DeliveryFailed(String),
}

pub enum StartOutcome<A> {
    /// Not authenticated. Nothing was fetched or opened.
    Redirect,
    Ready {
        session: Box<SessionController<A>>,
        /// Set when the directory fetch failed. The connection was opened
        /// anyway.
        directory_error: Option<ApiError>,
    },
}

/// Coordinates the connection, the message store and the directory.
///
/// Owns nothing the connection manager owns: all connection changes go
/// through the [`ConnectionHandle`], and every inbound event is handled to
/// completion before the next one is read.
pub struct SessionController<A> {
    api: A,
    local_user: Id,
    connection: ConnectionHandle,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    store: MessageStore,
    directory: ConversationDirectory,
}

impl<A: ChatApi> SessionController<A> {
    /// Run the startup sequence: auth check, local user, directory, open.
    ///
    /// A failed or negative auth check ends in [`StartOutcome::Redirect`]
    /// without touching the API or the connection.
    pub async fn start<G: AuthGuard>(
        guard: &G,
        api: A,
        connection: ConnectionHandle,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Result<StartOutcome<A>, SessionError> {
        let status = match guard.check_session().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "session check failed, treating as signed out");
                SessionStatus::default()
            }
        };
        if !status.authenticated {
            info!("not authenticated, redirecting");
            return Ok(StartOutcome::Redirect);
        }

        let local_user = match status.user_id {
            Some(id) => id,
            None => api.current_user().await?,
        };
        info!(user = %local_user, "session authenticated");

        let mut directory = ConversationDirectory::new();
        let directory_error = match api.conversations().await {
            Ok(conversations) => {
                directory.refresh(conversations);
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch conversations");
                Some(e)
            }
        };

        connection.open().await?;

        Ok(StartOutcome::Ready {
            session: Box::new(Self {
                api,
                local_user,
                connection,
                events,
                store: MessageStore::new(),
                directory,
            }),
            directory_error,
        })
    }

    /// Select a conversation, fetching its history the first time.
    pub async fn open_conversation(&mut self, conversation: &Id) -> Result<&[Message], SessionError> {
        if self.directory.find(conversation).is_none() {
            return Err(SessionError::UnknownConversation(conversation.clone()));
        }
        if !self.store.has_history(conversation) {
            let history = self.api.messages(conversation).await?;
            self.store.load_history(conversation, history);
        }
        Ok(self.store.get(conversation))
    }

    /// Re-fetch the directory.
    pub async fn refresh_directory(&mut self) -> Result<(), SessionError> {
        let conversations = self.api.conversations().await?;
        self.directory.refresh(conversations);
        Ok(())
    }

    /// Show `text` locally, then put it on the wire.
    ///
    /// On `NotConnected` the optimistic entry stays in the log and nothing
    /// is queued; call [`reconnect`](Self::reconnect) and send again.
    pub async fn send_message(&mut self, conversation: &Id, text: &str) -> Result<(), SessionError> {
        let recipient = match self.directory.find(conversation) {
            Some(entry) => entry.counterpart.id.clone(),
            None => return Err(SessionError::UnknownConversation(conversation.clone())),
        };

        let message = Message::optimistic(
            self.local_user.clone(),
            recipient.clone(),
            conversation.clone(),
            text,
        );
        self.store.append_optimistic(conversation, message);

        let frame = OutboundFrame::direct(&recipient, text, conversation).encode()?;
        if let Err(e) = self.connection.send(frame).await {
            warn!(%conversation, error = %e, "message not delivered");
            return Err(e);
        }
        debug!(%conversation, "message sent");
        Ok(())
    }

    /// Ask the connection to open again, e.g. after exhaustion.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        info!("reconnect requested");
        self.connection.open().await
    }

    /// Apply one connection event to the store and directory.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Option<SessionNotice> {
        match event {
            ConnectionEvent::StateChanged(state) => Some(SessionNotice::StateChanged(state)),
            ConnectionEvent::Opened => {
                info!("connected");
                None
            }
            ConnectionEvent::Frame(raw) => self.route_frame(&raw),
            ConnectionEvent::Closed { code, expected, .. } => {
                debug!(code, expected, "connection closed");
                None
            }
            ConnectionEvent::Exhausted { attempts } => {
                Some(SessionNotice::ConnectionLost { attempts })
            }
        }
    }

    fn route_frame(&mut self, raw: &str) -> Option<SessionNotice> {
        match parse_inbound(raw) {
            Ok(InboundFrame::Message(message)) => {
                let conversation_id = message.conversation_id.clone();
                debug!(conversation = %conversation_id, "message received");
                self.directory.touch(&conversation_id, &message);
                self.store.append_inbound(&conversation_id, message.clone());
                Some(SessionNotice::MessageReceived {
                    conversation_id,
                    message,
                })
            }
            Ok(InboundFrame::ServerError(reason)) => {
                warn!(%reason, "server reported a delivery failure");
                Some(SessionNotice::DeliveryFailed(reason))
            }
            Err(e) => {
                warn!(error = %e, len = raw.len(), "discarding malformed frame");
                None
            }
        }
    }

    /// Wait for the next event worth showing. `None` once the connection
    /// manager is gone.
    pub async fn next_notice(&mut self) -> Option<SessionNotice> {
        loop {
            let event = self.events.recv().await?;
            if let Some(notice) = self.handle_event(event) {
                return Some(notice);
            }
        }
    }

    /// End the session. The closure is intentional, so nothing reconnects.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        info!("ending session");
        self.connection.close(NORMAL_CLOSURE, "session ended").await
    }

    pub fn local_user(&self) -> &Id {
        &self.local_user
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn messages(&self, conversation: &Id) -> &[Message] {
        self.store.get(conversation)
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, LinkCommand, RetryPolicy, ABNORMAL_CLOSURE};
    use crate::test_helpers::{MockConnector, MockPeer};
    use crate::types::Counterpart;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeGuard(Result<SessionStatus, ()>);

    impl AuthGuard for FakeGuard {
        async fn check_session(&self) -> Result<SessionStatus, ApiError> {
            self.0.clone().map_err(|_| ApiError::Unavailable)
        }
    }

    fn signed_in(user: Option<&str>) -> FakeGuard {
        FakeGuard(Ok(SessionStatus {
            authenticated: true,
            user_id: user.map(Id::new),
        }))
    }

    struct FakeApi {
        user: Id,
        conversations: Vec<Conversation>,
        fail_directory: bool,
        history: HashMap<Id, Vec<Message>>,
        calls: Arc<Mutex<Vec<String>>>,
        connector: Arc<MockConnector>,
    }

    impl FakeApi {
        fn record(&self, call: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{call} dials={}", self.connector.dial_count()));
        }
    }

    impl ChatApi for FakeApi {
        async fn current_user(&self) -> Result<Id, ApiError> {
            self.record("current_user");
            Ok(self.user.clone())
        }

        async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
            self.record("conversations");
            if self.fail_directory {
                return Err(ApiError::Other(anyhow::anyhow!("500 from server")));
            }
            Ok(self.conversations.clone())
        }

        async fn messages(&self, conversation: &Id) -> Result<Vec<Message>, ApiError> {
            self.record(&format!("messages {conversation}"));
            Ok(self.history.get(conversation).cloned().unwrap_or_default())
        }
    }

    fn conversation(id: &str, with: &str) -> Conversation {
        Conversation {
            id: Id::new(id),
            counterpart: Counterpart {
                id: Id::new(with),
                name: format!("{with} name"),
                username: with.to_lowercase(),
            },
            last_message: None,
        }
    }

    fn push(chat: &str, from: &str, content: &str) -> String {
        serde_json::json!({
            "type": "direct",
            "_id": {"$oid": format!("m-{content}")},
            "chat_id": {"$oid": chat},
            "from_id": {"$oid": from},
            "to_id": {"$oid": "U1"},
            "content": content,
        })
        .to_string()
    }

    struct Harness {
        connector: Arc<MockConnector>,
        peers: mpsc::UnboundedReceiver<MockPeer>,
        calls: Arc<Mutex<Vec<String>>>,
        api: FakeApi,
    }

    fn harness() -> Harness {
        let (connector, peers) = MockConnector::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let api = FakeApi {
            user: Id::new("U1"),
            conversations: vec![conversation("C1", "U2"), conversation("C2", "U3")],
            fail_directory: false,
            history: HashMap::new(),
            calls: calls.clone(),
            connector: connector.clone(),
        };
        Harness {
            connector,
            peers,
            calls,
            api,
        }
    }

    async fn start(
        guard: &FakeGuard,
        api: FakeApi,
        connector: Arc<MockConnector>,
    ) -> StartOutcome<FakeApi> {
        let (handle, events) = ConnectionManager::spawn(connector, RetryPolicy::default());
        SessionController::start(guard, api, handle, events)
            .await
            .unwrap()
    }

    fn ready(outcome: StartOutcome<FakeApi>) -> SessionController<FakeApi> {
        match outcome {
            StartOutcome::Ready { session, .. } => *session,
            StartOutcome::Redirect => panic!("expected a ready session"),
        }
    }

    async fn wait_for(session: &mut SessionController<FakeApi>, state: ConnectionState) {
        loop {
            match session.next_notice().await {
                Some(SessionNotice::StateChanged(s)) if s == state => return,
                Some(_) => continue,
                None => panic!("connection manager stopped"),
            }
        }
    }

    #[tokio::test]
    async fn unauthenticated_redirects_without_fetching_or_connecting() {
        let h = harness();
        let guard = FakeGuard(Ok(SessionStatus::default()));
        let outcome = start(&guard, h.api, h.connector.clone()).await;

        assert!(matches!(outcome, StartOutcome::Redirect));
        assert!(h.calls.lock().unwrap().is_empty());
        assert_eq!(h.connector.dial_count(), 0);
    }

    #[tokio::test]
    async fn failed_session_check_redirects() {
        let h = harness();
        let guard = FakeGuard(Err(()));
        let outcome = start(&guard, h.api, h.connector.clone()).await;

        assert!(matches!(outcome, StartOutcome::Redirect));
        assert_eq!(h.connector.dial_count(), 0);
    }

    #[tokio::test]
    async fn startup_fetches_directory_before_opening() {
        let h = harness();
        let session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);

        assert_eq!(*h.calls.lock().unwrap(), vec!["conversations dials=0"]);
        assert_eq!(h.connector.dial_count(), 1);
        assert_eq!(session.directory().len(), 2);
        assert_eq!(session.local_user(), &Id::new("U1"));
    }

    #[tokio::test]
    async fn local_user_falls_back_to_lookup() {
        let h = harness();
        let session = ready(start(&signed_in(None), h.api, h.connector.clone()).await);

        assert_eq!(
            *h.calls.lock().unwrap(),
            vec!["current_user dials=0", "conversations dials=0"]
        );
        assert_eq!(session.local_user(), &Id::new("U1"));
    }

    #[tokio::test]
    async fn directory_failure_still_opens_connection() {
        let mut h = harness();
        h.api.fail_directory = true;
        let outcome = start(&signed_in(Some("U1")), h.api, h.connector.clone()).await;

        match outcome {
            StartOutcome::Ready {
                session,
                directory_error,
            } => {
                assert!(directory_error.is_some());
                assert!(session.directory().is_empty());
            }
            StartOutcome::Redirect => panic!("expected a ready session"),
        }
        assert_eq!(h.connector.dial_count(), 1);
    }

    #[tokio::test]
    async fn send_while_connected_appends_then_writes_direct_frame() {
        let mut h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);
        let mut peer = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;

        let c1 = Id::new("C1");
        session.send_message(&c1, "hi").await.unwrap();

        let log = session.messages(&c1);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].content, "hi");
        assert!(log[0].is_optimistic());
        assert_eq!(log[0].sender_id, Some(Id::new("U1")));

        let Some(LinkCommand::Text(frame)) = peer.from_client.recv().await else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "direct", "to_id": "U2", "content": "hi", "chat_id": "C1"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_keeps_optimistic_entry() {
        let h = harness();
        h.connector.fail_next(100);
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);

        let c1 = Id::new("C1");
        let err = session.send_message(&c1, "queued?").await.unwrap_err();

        assert!(matches!(err, SessionError::NotConnected));
        assert_eq!(session.messages(&c1).len(), 1);
        assert_eq!(session.store().pending_count(&c1), 1);
    }

    #[tokio::test]
    async fn send_to_unknown_conversation_is_rejected() {
        let h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);

        let err = session.send_message(&Id::new("C9"), "hello?").await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownConversation(_)));
        assert!(!session.store().contains(&Id::new("C9")));
    }

    #[tokio::test]
    async fn inbound_push_updates_store_and_directory() {
        let mut h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);
        let peer = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;

        peer.push("{not json");
        peer.push(&push("C1", "U2", "hello"));

        match session.next_notice().await {
            Some(SessionNotice::MessageReceived {
                conversation_id,
                message,
            }) => {
                assert_eq!(conversation_id, Id::new("C1"));
                assert_eq!(message.content, "hello");
            }
            other => panic!("unexpected notice {other:?}"),
        }

        let c1 = Id::new("C1");
        assert_eq!(session.messages(&c1).len(), 1);
        assert_eq!(session.directory().find(&c1).unwrap().preview(), "hello");
    }

    #[tokio::test]
    async fn push_for_unknown_conversation_leaves_directory_alone() {
        let mut h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);
        let peer = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;

        peer.push(&push("C9", "U7", "who?"));
        session.next_notice().await.unwrap();

        assert_eq!(session.directory().len(), 2);
        assert!(session.directory().find(&Id::new("C9")).is_none());
        assert_eq!(session.messages(&Id::new("C9")).len(), 1);
    }

    #[tokio::test]
    async fn server_error_frame_is_surfaced() {
        let mut h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);
        let peer = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;

        peer.push(r#"{"err":"unable to send message"}"#);
        assert_eq!(
            session.next_notice().await,
            Some(SessionNotice::DeliveryFailed("unable to send message".to_string()))
        );
    }

    #[tokio::test]
    async fn history_is_fetched_once_per_conversation() {
        let mut h = harness();
        let c1 = Id::new("C1");
        let old = Message {
            id: Some(Id::new("m0")),
            sender_id: Some(Id::new("U2")),
            recipient_id: Id::new("U1"),
            conversation_id: c1.clone(),
            content: "earlier".to_string(),
            origin_timestamp: None,
        };
        h.api.history.insert(c1.clone(), vec![old.clone()]);
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);

        assert_eq!(session.open_conversation(&c1).await.unwrap(), &[old]);
        session.open_conversation(&c1).await.unwrap();

        let fetches = h
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("messages"))
            .count();
        assert_eq!(fetches, 1);

        let err = session.open_conversation(&Id::new("C9")).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownConversation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_reported_once() {
        let mut h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);
        let peer = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;

        h.connector.fail_next(5);
        peer.close(ABNORMAL_CLOSURE, "");

        let mut lost = Vec::new();
        while let Ok(Some(notice)) =
            tokio::time::timeout(Duration::from_secs(60), session.next_notice()).await
        {
            if let SessionNotice::ConnectionLost { attempts } = notice {
                lost.push(attempts);
            }
        }
        assert_eq!(lost, vec![5]);
        assert_eq!(session.connection_state(), ConnectionState::Exhausted);

        session.reconnect().await.unwrap();
        let _fresh = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_normally_and_stays_closed() {
        let mut h = harness();
        let mut session = ready(start(&signed_in(Some("U1")), h.api, h.connector.clone()).await);
        let mut peer = h.peers.recv().await.unwrap();
        wait_for(&mut session, ConnectionState::Open).await;

        session.shutdown().await.unwrap();
        assert_eq!(
            peer.from_client.recv().await,
            Some(LinkCommand::Close {
                code: NORMAL_CLOSURE,
                reason: "session ended".to_string(),
            })
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.dial_count(), 1);
        assert_eq!(session.connection_state(), ConnectionState::Idle);
    }
}
