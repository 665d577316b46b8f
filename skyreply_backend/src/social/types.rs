use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========================================================================
// Records and references
// ========================================================================

/// A `{uri, cid}` pair pinning one specific version of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Where a post attaches in a conversation: the top of the thread and the
/// post being answered directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: Author,
    pub record: PostRecord,
    pub indexed_at: DateTime<Utc>,
}

// ========================================================================
// Threads
// ========================================================================

/// One node of a `getPostThread` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ThreadNode {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post(ThreadViewPost),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound { uri: String },
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked { uri: String },
    #[serde(other)]
    Unknown,
}

impl ThreadNode {
    pub fn as_post(&self) -> Option<&ThreadViewPost> {
        match self {
            ThreadNode::Post(post) => Some(post),
            _ => None,
        }
    }
}

/// A post together with its ancestor chain and its direct replies.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadViewPost {
    pub post: PostView,
    #[serde(default)]
    pub parent: Option<Box<ThreadNode>>,
    #[serde(default)]
    pub replies: Option<Vec<ThreadNode>>,
}

#[derive(Debug, Deserialize)]
pub struct GetPostThreadResponse {
    pub thread: ThreadNode,
}

// ========================================================================
// Notifications
// ========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationReason {
    Mention,
    Reply,
    Like,
    Repost,
    Follow,
    Quote,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub uri: String,
    pub cid: String,
    pub author: Author,
    pub reason: NotificationReason,
    #[serde(default)]
    pub record: PostRecord,
    #[serde(default)]
    pub is_read: bool,
    pub indexed_at: DateTime<Utc>,
}

impl Notification {
    /// Mentions and replies are the only notifications the bot answers.
    pub fn is_addressed_to_bot(&self) -> bool {
        matches!(
            self.reason,
            NotificationReason::Mention | NotificationReason::Reply
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsResponse {
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

// ========================================================================
// Sessions
// ========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// The logged-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub did: String,
    pub handle: String,
}

impl From<&Session> for Identity {
    fn from(session: &Session) -> Self {
        Self {
            did: session.did.clone(),
            handle: session.handle.clone(),
        }
    }
}
