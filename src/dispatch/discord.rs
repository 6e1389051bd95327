use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::sink::{OutboundMessage, ResponseSink, ESCALATION_TEXT};

const ANSWER_COLOR: u32 = 0x0057_F287;
const HINT_COLOR: u32 = 0x0058_65F2;
const ESCALATION_COLOR: u32 = 0x00ED_4245;

#[derive(Clone)]
pub struct DiscordWebhookSink {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordWebhookSink {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// `?wait=true` makes Discord return the created message.
    fn post_url(&self) -> String {
        let sep = if self.webhook.contains('?') { '&' } else { '?' };
        format!("{}{}wait=true", self.webhook, sep)
    }
}

#[async_trait]
impl ResponseSink for DiscordWebhookSink {
    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct Created {
            id: Option<String>,
        }

        let payload = DiscordWebhookPayload::for_message(message);
        let url = self.post_url();

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Discord webhook HTTP error: {e}"));
                    }
                    // A 204 or an unexpected body still counts as delivered.
                    let id = rsp.json::<Created>().await.ok().and_then(|c| c.id);
                    return Ok(id);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Discord webhook request failed: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter>,
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

fn docs_field(name: &str, link: &Option<String>) -> Option<EmbedField> {
    link.as_ref().map(|l| EmbedField {
        name: name.to_string(),
        value: format!("[Learn more]({l})"),
        inline: false,
    })
}

impl DiscordWebhookPayload {
    fn for_message(message: &OutboundMessage) -> Self {
        let embed = match message {
            OutboundMessage::FullAnswer { text, link, .. } => {
                let mut fields: Vec<EmbedField> =
                    docs_field("📚 Documentation", link).into_iter().collect();
                fields.push(EmbedField {
                    name: "💬 Did this help?".to_string(),
                    value: "React with 👍 or 👎".to_string(),
                    inline: false,
                });
                DiscordEmbed {
                    title: "💡 Quick Answer".to_string(),
                    description: text.clone(),
                    color: ANSWER_COLOR,
                    fields,
                    footer: Some(EmbedFooter {
                        text: "🤖 Automated response • A team member will follow up if needed"
                            .to_string(),
                    }),
                }
            }
            OutboundMessage::PartialHint { topic, link, .. } => DiscordEmbed {
                title: "📚 Relevant Resources".to_string(),
                description: format!(
                    "I noticed you might be asking about **{topic}**. Here are some helpful links:"
                ),
                color: HINT_COLOR,
                fields: docs_field("Documentation", link).into_iter().collect(),
                footer: Some(EmbedFooter {
                    text: "A team member will respond soon!".to_string(),
                }),
            },
            OutboundMessage::Escalation { .. } => DiscordEmbed {
                title: "🙋 Escalation".to_string(),
                description: ESCALATION_TEXT.to_string(),
                color: ESCALATION_COLOR,
                fields: Vec::new(),
                footer: None,
            },
        };
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_payload_carries_docs_and_prompt() {
        let msg = OutboundMessage::FullAnswer {
            channel_id: "c".into(),
            reply_to: "m".into(),
            text: "Use the signing secret.".into(),
            link: Some("https://docs.example.com/webhooks".into()),
        };
        let v = serde_json::to_value(DiscordWebhookPayload::for_message(&msg)).unwrap();
        let embed = &v["embeds"][0];
        assert_eq!(embed["title"], "💡 Quick Answer");
        assert_eq!(embed["description"], "Use the signing secret.");
        assert_eq!(
            embed["fields"][0]["value"],
            "[Learn more](https://docs.example.com/webhooks)"
        );
        assert_eq!(embed["fields"][1]["name"], "💬 Did this help?");
    }

    #[test]
    fn hint_without_link_has_no_fields() {
        let msg = OutboundMessage::PartialHint {
            channel_id: "c".into(),
            reply_to: "m".into(),
            topic: "Domains".into(),
            link: None,
        };
        let v = serde_json::to_value(DiscordWebhookPayload::for_message(&msg)).unwrap();
        assert!(v["embeds"][0]["description"]
            .as_str()
            .unwrap()
            .contains("**Domains**"));
        assert!(v["embeds"][0].get("fields").is_none());
    }

    #[test]
    fn wait_flag_is_appended() {
        let s = DiscordWebhookSink::new("https://discord.com/api/webhooks/1/t".into());
        assert_eq!(s.post_url(), "https://discord.com/api/webhooks/1/t?wait=true");
        let s = DiscordWebhookSink::new("https://x/hook?thread_id=9".into())
            .with_timeout(2)
            .with_retries(0);
        assert_eq!(s.post_url(), "https://x/hook?thread_id=9&wait=true");
        assert_eq!(s.max_retries, 1);
    }
}
