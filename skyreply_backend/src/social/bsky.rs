//! Bluesky client speaking AT Protocol XRPC over HTTP.
//!
//! The session obtained at login is kept for the life of the process. When
//! the PDS answers with `ExpiredToken`, the session is refreshed once and the
//! call is repeated.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::types::{
    GetPostThreadResponse, Identity, ListNotificationsResponse, Notification, ReplyRef, Session,
    StrongRef, ThreadNode, ThreadViewPost, UnreadCountResponse,
};
use super::SocialClient;

const POST_COLLECTION: &str = "app.bsky.feed.post";
const NOTIFICATION_PAGE_LIMIT: &str = "50";

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct BskyClient {
    service_url: String,
    client: Client,
    session: RwLock<Option<Session>>,
}

impl BskyClient {
    pub fn new(service_url: String, client: Client) -> Self {
        Self {
            service_url: service_url.trim_end_matches('/').to_string(),
            client,
            session: RwLock::new(None),
        }
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service_url, nsid)
    }

    async fn current_session(&self) -> Result<Session> {
        self.session
            .read()
            .await
            .clone()
            .context("Not logged in to Bluesky")
    }

    async fn refresh_session(&self) -> Result<()> {
        let refresh_jwt = self.current_session().await?.refresh_jwt;
        let url = self.xrpc_url("com.atproto.server.refreshSession");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&refresh_jwt)
            .send()
            .await
            .context("Failed to send refreshSession request")?;
        let response = ensure_success("com.atproto.server.refreshSession", response).await?;

        let session: Session = response
            .json()
            .await
            .context("Failed to parse refreshed session")?;
        tracing::info!("Refreshed Bluesky session for {}", session.handle);
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Send an authenticated request, refreshing the session once if the
    /// access token has expired.
    async fn send_authed<F>(&self, nsid: &str, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.current_session().await?.access_jwt;
        let response = build(token.as_str())
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", nsid))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read body".to_string());

        if !is_expired_token(&body) {
            anyhow::bail!("{} returned error {}: {}", nsid, status, body);
        }

        tracing::debug!("Access token expired during {}, refreshing session", nsid);
        self.refresh_session().await?;

        let token = self.current_session().await?.access_jwt;
        let response = build(token.as_str())
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", nsid))?;
        ensure_success(nsid, response).await
    }

    async fn query<T>(&self, nsid: &str, params: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.xrpc_url(nsid);
        let response = self
            .send_authed(nsid, |token| {
                self.client.get(&url).query(params).bearer_auth(token)
            })
            .await?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", nsid))
    }

    async fn procedure(&self, nsid: &str, body: &serde_json::Value) -> Result<Response> {
        let url = self.xrpc_url(nsid);
        self.send_authed(nsid, |token| {
            self.client.post(&url).json(body).bearer_auth(token)
        })
        .await
    }
}

#[async_trait]
impl SocialClient for BskyClient {
    async fn login(&self, handle: &str, password: &str) -> Result<Identity> {
        let url = self.xrpc_url("com.atproto.server.createSession");
        let payload = serde_json::json!({ "identifier": handle, "password": password });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send createSession request")?;
        let response = ensure_success("com.atproto.server.createSession", response).await?;

        let session: Session = response
            .json()
            .await
            .context("Failed to parse createSession response")?;
        let identity = Identity::from(&session);
        tracing::info!("Logged in to Bluesky as {} ({})", identity.handle, identity.did);

        *self.session.write().await = Some(session);
        Ok(identity)
    }

    async fn unread_count(&self) -> Result<u64> {
        let response: UnreadCountResponse = self
            .query("app.bsky.notification.getUnreadCount", &[])
            .await?;
        Ok(response.count)
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>> {
        let response: ListNotificationsResponse = self
            .query(
                "app.bsky.notification.listNotifications",
                &[("limit", NOTIFICATION_PAGE_LIMIT)],
            )
            .await?;
        Ok(response.notifications)
    }

    async fn get_post_thread(&self, uri: &str) -> Result<ThreadViewPost> {
        let response: GetPostThreadResponse = self
            .query("app.bsky.feed.getPostThread", &[("uri", uri)])
            .await?;

        match response.thread {
            ThreadNode::Post(thread) => Ok(thread),
            ThreadNode::NotFound { .. } => anyhow::bail!("Post {} was not found", uri),
            ThreadNode::Blocked { .. } => anyhow::bail!("Post {} is blocked", uri),
            ThreadNode::Unknown => anyhow::bail!("Post {} returned an unknown thread type", uri),
        }
    }

    async fn update_seen(&self, seen_at: DateTime<Utc>) -> Result<()> {
        let payload = serde_json::json!({ "seenAt": format_timestamp(seen_at) });
        self.procedure("app.bsky.notification.updateSeen", &payload)
            .await?;
        Ok(())
    }

    async fn send_post(&self, text: &str, reply_to: ReplyRef) -> Result<StrongRef> {
        let repo = self.current_session().await?.did;
        let payload = serde_json::json!({
            "repo": repo,
            "collection": POST_COLLECTION,
            "record": new_post_record(text, &reply_to, Utc::now()),
        });

        let response = self
            .procedure("com.atproto.repo.createRecord", &payload)
            .await?;
        response
            .json()
            .await
            .context("Failed to parse createRecord response")
    }
}

async fn ensure_success(nsid: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read body".to_string());
    anyhow::bail!("{} returned error {}: {}", nsid, status, body);
}

fn is_expired_token(body: &str) -> bool {
    serde_json::from_str::<XrpcError>(body)
        .map(|err| {
            err.error.as_deref() == Some("ExpiredToken")
                || (err.error.as_deref() == Some("InvalidToken")
                    && err
                        .message
                        .as_deref()
                        .map(|m| m.contains("expired"))
                        .unwrap_or(false))
        })
        .unwrap_or(false)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_post_record(text: &str, reply_to: &ReplyRef, created_at: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "$type": POST_COLLECTION,
        "text": text,
        "createdAt": format_timestamp(created_at),
        "reply": reply_to,
    })
}
