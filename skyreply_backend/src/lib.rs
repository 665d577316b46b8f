//! Reply bot for Bluesky: answers mentions and replies with generated text,
//! threaded under the post that addressed it.

pub mod agent;
pub mod config;
pub mod http_client;
pub mod llm_client;
pub mod runtime;
pub mod social;
