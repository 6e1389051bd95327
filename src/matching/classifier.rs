//! Classifier providers: the remote LLM call behind the semantic matcher.
//!
//! A provider only turns `(system, user)` prompts into raw completion text.
//! Prompt construction, parsing and validation live in `semantic` and
//! `validate`, so every provider is held to the same output contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ai::{ClassifierConfig, ProviderKind};

const USER_AGENT: &str = "support-triage/0.1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier disabled")]
    Disabled,
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifierError::Timeout(Duration::ZERO)
        } else if let Some(status) = e.status() {
            ClassifierError::Status(status.as_u16())
        } else {
            ClassifierError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Raw completion text for one request.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifierError>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// Factory: build a provider according to config.
///
/// * `mock` returns a deterministic client that answers "no match".
/// * `disabled` always fails, which routes every request to the keyword path.
pub fn build_classifier(cfg: &ClassifierConfig) -> anyhow::Result<DynClassifier> {
    let client: DynClassifier = match cfg.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicClassifier::new(cfg)?),
        ProviderKind::OpenAi => Arc::new(OpenAiClassifier::new(cfg)?),
        ProviderKind::Mock => Arc::new(MockClassifier::no_match()),
        ProviderKind::Disabled => Arc::new(DisabledClassifier),
    };
    info!(
        target: "classifier",
        provider = client.provider_name(),
        model = %cfg.model,
        key_len = cfg.api_key.len(),
        "classifier ready"
    );
    Ok(client)
}

fn http_client(cfg: &ClassifierConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .timeout(cfg.timeout)
        .build()?)
}

/// Anthropic Messages API.
pub struct AnthropicClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClassifier {
    pub fn new(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(cfg)?,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }
}

#[async_trait]
impl Classifier for AnthropicClassifier {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifierError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            system: &'a str,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            text: Option<String>,
        }

        let req = Req {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system,
            messages: vec![Msg {
                role: "user",
                content: user,
            }],
        };

        let resp = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClassifierError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        let text: String = body
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(ClassifierError::Malformed("empty completion".into()));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

/// OpenAI Chat Completions API.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClassifier {
    pub fn new(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(cfg)?,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifierError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Format {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: Format,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            max_tokens: self.max_tokens,
            response_format: Format {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClassifierError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ClassifierError::Malformed("empty completion".into()))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Always fails; used when the classifier is switched off.
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifierError> {
        Err(ClassifierError::Disabled)
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(ClassifierError),
}

/// Deterministic provider for tests and local runs. Counts calls.
#[derive(Debug)]
pub struct MockClassifier {
    reply: MockReply,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockClassifier {
    /// Replies with `text` verbatim.
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: MockReply::Text(text.into()),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Replies with a well-formed claim.
    pub fn claiming(faq_id: &str, confidence: f64) -> Self {
        Self::replying(
            serde_json::json!({
                "faq_id": faq_id,
                "confidence": confidence,
                "reasoning": "mock classifier"
            })
            .to_string(),
        )
    }

    pub fn no_match() -> Self {
        Self::replying(r#"{"faq_id": "none", "confidence": 0.0, "reasoning": "mock classifier"}"#)
    }

    pub fn failing(err: ClassifierError) -> Self {
        Self {
            reply: MockReply::Fail(err),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match &self.reply {
            MockReply::Text(t) => Ok(t.clone()),
            MockReply::Fail(e) => Err(e.clone()),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_counts_calls_and_replies() {
        let m = MockClassifier::claiming("webhooks", 0.8);
        let out = m.complete("sys", "user").await.unwrap();
        assert!(out.contains("\"webhooks\""));
        m.complete("sys", "user").await.unwrap();
        assert_eq!(m.calls(), 2);
    }

    #[tokio::test]
    async fn disabled_always_errors() {
        let err = DisabledClassifier.complete("s", "u").await.unwrap_err();
        assert_eq!(err, ClassifierError::Disabled);
    }

    #[test]
    fn factory_respects_provider() {
        let mock = build_classifier(&ClassifierConfig::mock()).unwrap();
        assert_eq!(mock.provider_name(), "mock");
        let off = build_classifier(&ClassifierConfig::default()).unwrap();
        assert_eq!(off.provider_name(), "disabled");
    }
}
