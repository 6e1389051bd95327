//! Outbound delivery seam: whatever actually posts into the chat platform.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::discord::DiscordWebhookSink;

pub const ESCALATION_TEXT: &str = "Hey team! 👋 User needs help with this question.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    FullAnswer {
        channel_id: String,
        reply_to: String,
        text: String,
        link: Option<String>,
    },
    PartialHint {
        channel_id: String,
        reply_to: String,
        topic: String,
        link: Option<String>,
    },
    Escalation {
        channel_id: String,
        reply_to: String,
    },
}

impl OutboundMessage {
    pub fn channel_id(&self) -> &str {
        match self {
            OutboundMessage::FullAnswer { channel_id, .. }
            | OutboundMessage::PartialHint { channel_id, .. }
            | OutboundMessage::Escalation { channel_id, .. } => channel_id,
        }
    }

    pub fn reply_to(&self) -> &str {
        match self {
            OutboundMessage::FullAnswer { reply_to, .. }
            | OutboundMessage::PartialHint { reply_to, .. }
            | OutboundMessage::Escalation { reply_to, .. } => reply_to,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::FullAnswer { .. } => "full_answer",
            OutboundMessage::PartialHint { .. } => "partial_hint",
            OutboundMessage::Escalation { .. } => "escalation",
        }
    }
}

#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver one message. Returns the platform id of the posted message
    /// when the platform reports one.
    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<Option<String>>;
    fn name(&self) -> &'static str;
}

pub type DynSink = Arc<dyn ResponseSink>;

/// Logs instead of posting; used when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl ResponseSink for LogSink {
    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<Option<String>> {
        info!(
            target: "dispatch",
            kind = message.kind(),
            channel = message.channel_id(),
            reply_to = message.reply_to(),
            "log sink delivery"
        );
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

pub fn build_sink(discord_webhook_url: Option<&str>) -> DynSink {
    match discord_webhook_url {
        Some(url) => Arc::new(DiscordWebhookSink::new(url.to_string())),
        None => Arc::new(LogSink),
    }
}
