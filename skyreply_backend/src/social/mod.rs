pub mod bsky;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use types::{
    Author, Identity, Notification, NotificationReason, PostRecord, PostView, ReplyRef,
    StrongRef, ThreadNode, ThreadViewPost,
};

/// The social network the bot lives on.
///
/// Calls are expected to return fully populated objects; transient failures
/// surface as errors and are not retried here.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Authenticate and return the account the bot acts as.
    async fn login(&self, handle: &str, password: &str) -> Result<Identity>;

    /// Number of notifications not yet marked seen.
    async fn unread_count(&self) -> Result<u64>;

    /// Pending notifications, in the order the network returns them.
    async fn list_notifications(&self) -> Result<Vec<Notification>>;

    /// Thread view centered on `uri`, with its ancestors and direct replies.
    async fn get_post_thread(&self, uri: &str) -> Result<ThreadViewPost>;

    async fn update_seen(&self, seen_at: DateTime<Utc>) -> Result<()>;

    /// Publish `text` as a reply; returns a reference to the new post.
    async fn send_post(&self, text: &str, reply_to: ReplyRef) -> Result<StrongRef>;
}
