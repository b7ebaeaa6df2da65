//! Glooo terminal client: REST and WebSocket collaborators for
//! [`glooo_session`], configuration, and the console front end.

pub mod api;
pub mod config;
pub mod console;
pub mod transport;

pub use api::HttpApi;
pub use config::{GloooConfig, Profile};
pub use transport::WsConnector;
