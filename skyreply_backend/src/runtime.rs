use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::ReplyAgent;
use crate::config::BotConfig;
use crate::http_client::build_http_client_with_timeout;
use crate::llm_client::{LlmClient, TextGenerator};
use crate::social::bsky::BskyClient;
use crate::social::SocialClient;

pub struct BackendRuntime {
    pub config: BotConfig,
    pub agent: Arc<ReplyAgent>,
}

pub struct BackendRuntimeBuilder {
    config: BotConfig,
    social: Option<Arc<dyn SocialClient>>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            social: None,
            generator: None,
        }
    }

    pub fn with_social_client(mut self, social: Arc<dyn SocialClient>) -> Self {
        self.social = Some(social);
        self
    }

    pub fn with_text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Validate the config, create any clients not supplied, and log in.
    pub async fn build(self) -> Result<BackendRuntime> {
        let config = self.config;
        config.validate().context("Invalid configuration")?;

        let http = match (&self.social, &self.generator) {
            (Some(_), Some(_)) => None,
            _ => Some(build_http_client_with_timeout(Some(Duration::from_secs(
                config.http_timeout_secs,
            )))?),
        };

        let social: Arc<dyn SocialClient> = match self.social {
            Some(social) => social,
            None => {
                tracing::info!("Using Bluesky service at {}", config.service_url);
                Arc::new(BskyClient::new(
                    config.service_url.clone(),
                    http.clone().unwrap_or_default(),
                ))
            }
        };

        let generator: Arc<dyn TextGenerator> = match self.generator {
            Some(generator) => generator,
            None => {
                tracing::info!("Using LLM {} at {}", config.llm_model, config.llm_api_url);
                Arc::new(LlmClient::from_config(
                    &config,
                    http.unwrap_or_default(),
                ))
            }
        };

        let identity = social
            .login(&config.handle, &config.password)
            .await
            .with_context(|| format!("Failed to log in as {}", config.handle))?;

        let agent = Arc::new(ReplyAgent::new(social, generator, identity, &config));

        Ok(BackendRuntime { config, agent })
    }
}

impl BackendRuntime {
    pub async fn bootstrap(config: BotConfig) -> Result<Self> {
        BackendRuntimeBuilder::new(config).build().await
    }

    pub fn spawn_agent_loop(&self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        let agent = self.agent.clone();
        tokio::spawn(agent.run_loop(shutdown))
    }

    /// Run the reply loop until `shutdown_signal` resolves. A loop that ends
    /// on its own, by panicking or returning, is an error.
    pub async fn run_until<F>(&self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let shutdown = CancellationToken::new();
        let mut agent_loop = self.spawn_agent_loop(shutdown.clone());

        tokio::select! {
            signal = shutdown_signal => {
                signal.context("failed to listen for shutdown signal")?;
                tracing::info!("Shutdown requested, stopping reply loop");
                shutdown.cancel();
                agent_loop.await.context("reply loop task failed")?
            }
            finished = &mut agent_loop => {
                tracing::error!("Reply loop ended without a shutdown request");
                finished.context("reply loop task failed")??;
                anyhow::bail!("reply loop stopped without a shutdown request")
            }
        }
    }
}
