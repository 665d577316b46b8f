pub mod conversation;
pub mod thread;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::BotConfig;
use crate::llm_client::TextGenerator;
use crate::social::{Identity, Notification, SocialClient};

use thread::{is_already_replied_to, reply_ref_for, thread_to_turns};

/// What one pass over the notifications did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub unread: u64,
    pub addressed: usize,
    pub replied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyOutcome {
    Replied,
    AlreadyReplied,
    EmptyReply,
}

pub struct ReplyAgent {
    social: Arc<dyn SocialClient>,
    generator: Arc<dyn TextGenerator>,
    identity: Identity,
    system_prompt: String,
    poll_interval: Duration,
}

impl ReplyAgent {
    pub fn new(
        social: Arc<dyn SocialClient>,
        generator: Arc<dyn TextGenerator>,
        identity: Identity,
        config: &BotConfig,
    ) -> Self {
        Self {
            social,
            generator,
            identity,
            system_prompt: config.system_prompt.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// A failed cycle is logged and the loop carries on after the usual
    /// interval; nothing inside a cycle is retried.
    pub async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            "Reply loop starting for {} (interval: {}s)",
            self.identity.handle,
            self.poll_interval.as_secs()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        tracing::error!("Reply cycle error: {:#}", e);
                    }
                }
            }

            tracing::info!("Sleeping for {} seconds...", self.poll_interval.as_secs());
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Reply loop stopped");
        Ok(())
    }

    /// One pass: check, fetch and filter, answer each notification in order,
    /// then mark everything seen as of the start of the pass.
    ///
    /// The first failing notification aborts the pass, and nothing is marked
    /// seen in that case.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let seen_at = Utc::now();
        tracing::debug!("Starting reply cycle for {}", self.identity.handle);
        let mut report = CycleReport::default();

        report.unread = self
            .social
            .unread_count()
            .await
            .context("Failed to fetch unread notification count")?;
        if report.unread == 0 {
            tracing::info!("No unread notifications.");
            return Ok(report);
        }

        let notifications: Vec<Notification> = self
            .social
            .list_notifications()
            .await
            .context("Failed to list notifications")?
            .into_iter()
            .filter(Notification::is_addressed_to_bot)
            .collect();
        report.addressed = notifications.len();
        tracing::debug!(
            "{} unread notification(s), {} mention(s)/reply(ies)",
            report.unread,
            report.addressed
        );

        for notification in &notifications {
            match self.process_notification(notification).await? {
                ReplyOutcome::Replied => report.replied += 1,
                ReplyOutcome::AlreadyReplied | ReplyOutcome::EmptyReply => report.skipped += 1,
            }
        }

        self.social
            .update_seen(seen_at)
            .await
            .context("Failed to mark notifications seen")?;

        Ok(report)
    }

    async fn process_notification(&self, notification: &Notification) -> Result<ReplyOutcome> {
        let thread = self
            .social
            .get_post_thread(&notification.uri)
            .await
            .with_context(|| format!("Failed to fetch thread for {}", notification.uri))?;

        if is_already_replied_to(&thread, &self.identity.did) {
            tracing::info!("Already replied to {}", notification.uri);
            return Ok(ReplyOutcome::AlreadyReplied);
        }

        let turns = thread_to_turns(&thread, &self.identity.did);
        let generated = self
            .generator
            .complete(&self.system_prompt, &turns)
            .await
            .with_context(|| format!("Failed to generate reply for {}", notification.uri))?;

        let reply = generated.trim();
        if reply.is_empty() {
            tracing::warn!("Generated reply for {} was empty; not posting", notification.uri);
            return Ok(ReplyOutcome::EmptyReply);
        }

        let posted = self
            .social
            .send_post(reply, reply_ref_for(notification))
            .await
            .with_context(|| format!("Failed to post reply to {}", notification.uri))?;
        tracing::info!("Replied to {} with {}", notification.uri, posted.uri);

        Ok(ReplyOutcome::Replied)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::conversation::{ConversationTurn, Role};
    use crate::social::{
        Author, NotificationReason, PostRecord, PostView, ReplyRef, StrongRef, ThreadNode,
        ThreadViewPost,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub const BOT_DID: &str = "did:plc:bot";

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Login(String, String),
        UnreadCount,
        ListNotifications,
        GetPostThread(String),
        UpdateSeen,
        SendPost(String, ReplyRef),
    }

    #[derive(Default)]
    pub struct FakeSocial {
        pub unread: u64,
        pub notifications: Vec<Notification>,
        pub threads: HashMap<String, ThreadViewPost>,
        pub calls: Mutex<Vec<Call>>,
        pub seen_at: Mutex<Option<DateTime<Utc>>>,
    }

    impl FakeSocial {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl SocialClient for FakeSocial {
        async fn login(&self, handle: &str, password: &str) -> Result<Identity> {
            self.record(Call::Login(handle.to_string(), password.to_string()));
            Ok(Identity {
                did: BOT_DID.to_string(),
                handle: handle.to_string(),
            })
        }

        async fn unread_count(&self) -> Result<u64> {
            self.record(Call::UnreadCount);
            Ok(self.unread)
        }

        async fn list_notifications(&self) -> Result<Vec<Notification>> {
            self.record(Call::ListNotifications);
            Ok(self.notifications.clone())
        }

        async fn get_post_thread(&self, uri: &str) -> Result<ThreadViewPost> {
            self.record(Call::GetPostThread(uri.to_string()));
            self.threads
                .get(uri)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no thread for {}", uri))
        }

        async fn update_seen(&self, seen_at: DateTime<Utc>) -> Result<()> {
            self.record(Call::UpdateSeen);
            *self.seen_at.lock().unwrap() = Some(seen_at);
            Ok(())
        }

        async fn send_post(&self, text: &str, reply_to: ReplyRef) -> Result<StrongRef> {
            self.record(Call::SendPost(text.to_string(), reply_to));
            Ok(StrongRef {
                uri: "at://did:plc:bot/app.bsky.feed.post/new".to_string(),
                cid: "new".to_string(),
            })
        }
    }

    /// Answers with a fixed text, or fails for prompts whose last turn
    /// contains `fail_on`.
    pub struct FakeGenerator {
        pub reply: String,
        pub fail_on: Option<String>,
        pub requests: Mutex<Vec<(String, Vec<ConversationTurn>)>>,
    }

    impl FakeGenerator {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                fail_on: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn complete(
            &self,
            system_instruction: &str,
            turns: &[ConversationTurn],
        ) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push((system_instruction.to_string(), turns.to_vec()));

            if let (Some(marker), Some(last)) = (&self.fail_on, turns.last()) {
                if last.text.contains(marker.as_str()) {
                    anyhow::bail!("No response from LLM");
                }
            }
            Ok(self.reply.clone())
        }
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn author(did: &str, handle: &str) -> Author {
        Author {
            did: did.to_string(),
            handle: handle.to_string(),
            display_name: None,
        }
    }

    fn post(uri: &str, author: Author, text: &str, minutes: i64) -> PostView {
        PostView {
            uri: uri.to_string(),
            cid: format!("cid:{}", uri),
            author,
            record: PostRecord {
                text: text.to_string(),
                ..Default::default()
            },
            indexed_at: at(minutes),
        }
    }

    fn mention(uri: &str, reason: NotificationReason, reply: Option<ReplyRef>) -> Notification {
        Notification {
            uri: uri.to_string(),
            cid: format!("cid:{}", uri),
            author: author("did:plc:alice", "alice.bsky.social"),
            reason,
            record: PostRecord {
                text: "@bot".to_string(),
                created_at: None,
                reply,
            },
            is_read: false,
            indexed_at: at(10),
        }
    }

    fn agent(social: Arc<FakeSocial>, generator: Arc<FakeGenerator>) -> ReplyAgent {
        let mut config = BotConfig::default();
        config.system_prompt = "Reply in 280 characters or less. No @mentions.".to_string();
        ReplyAgent::new(
            social,
            generator,
            Identity {
                did: BOT_DID.to_string(),
                handle: "bot.bsky.social".to_string(),
            },
            &config,
        )
    }

    /// alice starts a thread, the bot answers, alice follows up with a mention.
    fn conversation_fixture() -> FakeSocial {
        let root = ThreadViewPost {
            post: post("at://alice/1", author("did:plc:alice", "alice.bsky.social"), "hi", 0),
            parent: None,
            replies: None,
        };
        let bot_reply = ThreadViewPost {
            post: post("at://bot/2", author(BOT_DID, "bot.bsky.social"), "hello!", 1),
            parent: Some(Box::new(ThreadNode::Post(root))),
            replies: None,
        };
        let follow_up = ThreadViewPost {
            post: post(
                "at://alice/3",
                author("did:plc:alice", "alice.bsky.social"),
                "@bot how are you?",
                2,
            ),
            parent: Some(Box::new(ThreadNode::Post(bot_reply))),
            replies: Some(Vec::new()),
        };

        let reply_ref = ReplyRef {
            root: StrongRef {
                uri: "at://alice/1".to_string(),
                cid: "cid:at://alice/1".to_string(),
            },
            parent: StrongRef {
                uri: "at://bot/2".to_string(),
                cid: "cid:at://bot/2".to_string(),
            },
        };

        let mut threads = HashMap::new();
        threads.insert("at://alice/3".to_string(), follow_up);

        FakeSocial {
            unread: 2,
            notifications: vec![
                mention("at://dan/like", NotificationReason::Like, None),
                mention("at://alice/3", NotificationReason::Reply, Some(reply_ref)),
            ],
            threads,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn zero_unread_ends_cycle_immediately() {
        let social = Arc::new(FakeSocial::default());
        let generator = Arc::new(FakeGenerator::replying("unused"));
        let report = agent(social.clone(), generator.clone())
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report, CycleReport::default());
        assert_eq!(social.calls(), vec![Call::UnreadCount]);
        assert!(generator.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replies_to_mention_with_thread_history() {
        let social = Arc::new(conversation_fixture());
        let generator = Arc::new(FakeGenerator::replying("  Doing great, thanks!  "));
        let report = agent(social.clone(), generator.clone())
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(
            report,
            CycleReport {
                unread: 2,
                addressed: 1,
                replied: 1,
                skipped: 0,
            }
        );

        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (system, turns) = &requests[0];
        assert!(system.contains("No @mentions"));
        let summary: Vec<(Role, &str, &str)> = turns
            .iter()
            .map(|t| (t.role, t.speaker.as_str(), t.text.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Role::User, "alice_bsky_social", "hi"),
                (Role::Assistant, "bot_bsky_social", "hello!"),
                (Role::User, "alice_bsky_social", "@bot how are you?"),
            ]
        );

        let calls = social.calls();
        assert_eq!(
            calls,
            vec![
                Call::UnreadCount,
                Call::ListNotifications,
                Call::GetPostThread("at://alice/3".to_string()),
                Call::SendPost(
                    "Doing great, thanks!".to_string(),
                    ReplyRef {
                        root: StrongRef {
                            uri: "at://alice/1".to_string(),
                            cid: "cid:at://alice/1".to_string(),
                        },
                        parent: StrongRef {
                            uri: "at://alice/3".to_string(),
                            cid: "cid:at://alice/3".to_string(),
                        },
                    },
                ),
                Call::UpdateSeen,
            ]
        );
    }

    #[tokio::test]
    async fn skips_threads_already_answered() {
        let mut social = conversation_fixture();
        let thread = social.threads.get_mut("at://alice/3").unwrap();
        thread.replies = Some(vec![ThreadNode::Post(ThreadViewPost {
            post: post("at://bot/4", author(BOT_DID, "bot.bsky.social"), "great!", 3),
            parent: None,
            replies: None,
        })]);
        let social = Arc::new(social);
        let generator = Arc::new(FakeGenerator::replying("unused"));

        let report = agent(social.clone(), generator.clone())
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.replied, 0);
        assert_eq!(report.skipped, 1);
        assert!(generator.requests.lock().unwrap().is_empty());
        assert!(!social
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SendPost(..))));
        assert_eq!(social.calls().last(), Some(&Call::UpdateSeen));
    }

    #[tokio::test]
    async fn empty_generation_is_not_posted_but_marked_seen() {
        let social = Arc::new(conversation_fixture());
        let generator = Arc::new(FakeGenerator::replying("   "));

        let report = agent(social.clone(), generator).run_cycle().await.unwrap();

        assert_eq!(report.skipped, 1);
        let calls = social.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::SendPost(..))));
        assert_eq!(calls.last(), Some(&Call::UpdateSeen));
    }

    #[tokio::test]
    async fn failure_aborts_cycle_without_marking_seen() {
        let mut social = conversation_fixture();
        let standalone = ThreadViewPost {
            post: post(
                "at://carol/9",
                author("did:plc:carol", "carol.bsky.social"),
                "@bot tell me a joke",
                5,
            ),
            parent: None,
            replies: None,
        };
        social.threads.insert("at://carol/9".to_string(), standalone);
        // The failing mention comes first, so the later one is never reached.
        social.notifications.insert(
            0,
            mention("at://carol/9", NotificationReason::Mention, None),
        );
        let social = Arc::new(social);
        let generator = Arc::new(FakeGenerator {
            fail_on: Some("joke".to_string()),
            ..FakeGenerator::replying("ha")
        });

        let err = agent(social.clone(), generator)
            .run_cycle()
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("at://carol/9"));

        let calls = social.calls();
        assert!(!calls.contains(&Call::UpdateSeen));
        assert!(!calls.contains(&Call::GetPostThread("at://alice/3".to_string())));
        assert!(social.seen_at.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn seen_timestamp_is_taken_at_cycle_start() {
        let social = Arc::new(conversation_fixture());
        let generator = Arc::new(FakeGenerator::replying("ok"));
        let before = Utc::now();

        agent(social.clone(), generator).run_cycle().await.unwrap();

        let seen_at = social.seen_at.lock().unwrap().unwrap();
        assert!(seen_at >= before);
        assert!(seen_at <= Utc::now());
    }

    #[tokio::test]
    async fn loop_exits_immediately_when_already_cancelled() {
        let social = Arc::new(FakeSocial::default());
        let generator = Arc::new(FakeGenerator::replying("unused"));
        let agent = Arc::new(agent(social.clone(), generator));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        agent.run_loop(shutdown).await.unwrap();

        assert!(social.calls().is_empty());
    }

    #[tokio::test]
    async fn loop_stops_on_cancel_while_sleeping() {
        let social = Arc::new(FakeSocial::default());
        let generator = Arc::new(FakeGenerator::replying("unused"));
        let mut config = BotConfig::default();
        config.poll_interval_secs = 3600;
        let agent = Arc::new(ReplyAgent::new(
            social.clone(),
            generator,
            Identity {
                did: BOT_DID.to_string(),
                handle: "bot.bsky.social".to_string(),
            },
            &config,
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.run_loop(shutdown.clone()));

        for _ in 0..100 {
            if !social.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(social.calls(), vec![Call::UnreadCount]);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap()
            .unwrap();
    }
}
