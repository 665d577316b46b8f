use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::social::PostView;

/// Names accepted by the chat completion API for a message author.
const SPEAKER_LABEL_PATTERN: &str = r"^[a-zA-Z0-9_-]{1,64}$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Assistant => "assistant",
            Role::User => "user",
        }
    }
}

/// One post of the thread, as the generation request sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub speaker: String,
}

/// Order posts oldest first and tag each one by who wrote it.
///
/// Posts authored by `assistant_did` become assistant turns, everything else
/// is a user turn. The sort is stable, so posts indexed at the same instant
/// keep their incoming order.
pub fn posts_to_turns(mut posts: Vec<&PostView>, assistant_did: &str) -> Vec<ConversationTurn> {
    posts.sort_by_key(|post| post.indexed_at);

    posts
        .into_iter()
        .map(|post| {
            let role = if post.author.did == assistant_did {
                Role::Assistant
            } else {
                Role::User
            };
            ConversationTurn {
                role,
                text: post.record.text.clone(),
                speaker: speaker_label(&post.author.handle),
            }
        })
        .collect()
}

/// Handles contain periods, which message names may not.
pub fn speaker_label(handle: &str) -> String {
    let label = handle.replace('.', "_");
    if !is_valid_speaker_label(&label) {
        tracing::warn!(
            "Speaker label {:?} does not match {}; sending it unchanged",
            label,
            SPEAKER_LABEL_PATTERN
        );
    }
    label
}

pub fn is_valid_speaker_label(label: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SPEAKER_LABEL_PATTERN).ok())
        .as_ref()
        .map(|re| re.is_match(label))
        .unwrap_or(true)
}
