//! REST collaborators: session check, identity, directory and history.

use glooo_session::{ApiError, AuthGuard, ChatApi, Conversation, Id, Message, SessionStatus};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Name of the session cookie the server issues at login.
pub const SESSION_COOKIE: &str = "jwt";

pub fn cookie_header(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}")
}

/// Connection refused/reset means the server is down; anything else is
/// passed through.
pub fn from_reqwest(err: reqwest::Error) -> ApiError {
    if err.is_connect() {
        ApiError::Unavailable
    } else {
        ApiError::Other(err.into())
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: Option<Id>,
}

#[derive(Deserialize)]
struct MyIdResponse {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    err: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatsResponse {
    chats: Vec<Conversation>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<Message>,
}

/// Cookie-authenticated client for the chat server's REST routes.
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.header(reqwest::header::COOKIE, cookie_header(token));
        }
        req.send().await.map_err(from_reqwest)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.get(path).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Other(anyhow::anyhow!(
                "GET {path} returned {status}: {body}"
            )));
        }
        resp.json::<T>().await.map_err(|e| ApiError::Other(e.into()))
    }
}

impl AuthGuard for HttpApi {
    async fn check_session(&self) -> Result<SessionStatus, ApiError> {
        let resp = self.get("/auth/session").await?;
        // 406 and 401 both mean "no valid session"; the body still parses.
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Ok(SessionStatus::default());
        }
        let body: SessionResponse = resp.json().await.map_err(|e| ApiError::Other(e.into()))?;
        Ok(SessionStatus {
            authenticated: body.success,
            user_id: body.id.filter(|_| body.success),
        })
    }
}

impl ChatApi for HttpApi {
    async fn current_user(&self) -> Result<Id, ApiError> {
        let body: MyIdResponse = self.get_json("/api/get_my_id").await?;
        match (body.id, body.err) {
            (Some(id), _) => Ok(id),
            (None, err) => {
                debug!(?err, "server did not return an id");
                Err(ApiError::Unauthorized)
            }
        }
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let body: ChatsResponse = self.get_json("/api/chat/get_chats").await?;
        Ok(body.chats)
    }

    async fn messages(&self, conversation: &Id) -> Result<Vec<Message>, ApiError> {
        let path = format!("/api/chat/message/get_messages/{conversation}");
        let body: MessagesResponse = self.get_json(&path).await?;
        Ok(body.messages)
    }
}
