//! Glooo Session - real-time core of the Glooo chat client
//!
//! This crate owns the persistent connection to the chat server and keeps
//! per-conversation message logs and the conversation directory consistent
//! with it. It has no HTTP or socket dependencies: the transport comes in
//! through a [`Connector`], and REST calls through [`AuthGuard`] and
//! [`ChatApi`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use glooo_session::{
//!     AuthGuard, ChatApi, ConnectionManager, Connector, Id, RetryPolicy, SessionController,
//!     SessionNotice, StartOutcome,
//! };
//!
//! async fn run<C: Connector, G: AuthGuard, A: ChatApi>(connector: C, guard: G, api: A) {
//!     let (handle, events) = ConnectionManager::spawn(Arc::new(connector), RetryPolicy::default());
//!
//!     let StartOutcome::Ready { mut session, .. } =
//!         SessionController::start(&guard, api, handle, events).await.unwrap()
//!     else {
//!         println!("please sign in");
//!         return;
//!     };
//!
//!     session.send_message(&Id::new("C1"), "hi").await.unwrap();
//!
//!     while let Some(notice) = session.next_notice().await {
//!         if let SessionNotice::MessageReceived { message, .. } = notice {
//!             println!("{}", message.content);
//!         }
//!     }
//! }
//! ```

pub mod connection;
mod directory;
mod error;
pub mod protocol;
mod session;
mod store;
#[cfg(test)]
mod test_helpers;
pub mod types;

pub use connection::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, Connector, Link,
    LinkCommand, LinkEvent, RetryPolicy,
};
pub use directory::ConversationDirectory;
pub use error::{ApiError, ConnectError, SessionError};
pub use session::{AuthGuard, ChatApi, SessionController, SessionNotice, SessionStatus, StartOutcome};
pub use store::MessageStore;
pub use types::{Conversation, Counterpart, Id, Message, MessageSummary};
