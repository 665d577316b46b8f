use crate::social::{Notification, PostView, ReplyRef, StrongRef, ThreadNode, ThreadViewPost};

use super::conversation::{posts_to_turns, ConversationTurn};

/// The thread's own post followed by each ancestor, leaf first and root last.
///
/// The walk stops at the first parent that is not a visible post (missing,
/// blocked or of an unknown type). The network is trusted to hand back a
/// finite, acyclic parent chain.
pub fn flatten_posts(thread: &ThreadViewPost) -> Vec<&PostView> {
    let mut posts = vec![&thread.post];
    let mut current = thread;

    while let Some(parent) = current.parent.as_deref().and_then(ThreadNode::as_post) {
        posts.push(&parent.post);
        current = parent;
    }

    posts
}

/// Conversation history for a generation request, oldest turn first.
pub fn thread_to_turns(thread: &ThreadViewPost, assistant_did: &str) -> Vec<ConversationTurn> {
    posts_to_turns(flatten_posts(thread), assistant_did)
}

/// Whether `did` already answered this post directly.
///
/// Only direct children count: this guards against answering the same
/// mention twice, not against joining a branch the bot already spoke in.
pub fn is_already_replied_to(thread: &ThreadViewPost, did: &str) -> bool {
    thread
        .replies
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(ThreadNode::as_post)
        .any(|reply| reply.post.author.did == did)
}

/// Root/parent pair for answering `notification`.
///
/// The notified post is always the parent. The root is the thread root the
/// notified post itself points at, or the notified post when it starts a
/// thread of its own.
pub fn reply_ref_for(notification: &Notification) -> ReplyRef {
    let parent = StrongRef {
        uri: notification.uri.clone(),
        cid: notification.cid.clone(),
    };

    let root = match &notification.record.reply {
        Some(existing) => existing.root.clone(),
        None => parent.clone(),
    };

    ReplyRef { root, parent }
}
