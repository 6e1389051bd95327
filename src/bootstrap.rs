use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::audit::{SecurityLog, SupportLog};
use crate::config::Settings;
use crate::dispatch::build_sink;
use crate::gate::InjectionDetector;
use crate::knowledge::KnowledgeBase;
use crate::matching::build_classifier;
use crate::pipeline::{Triage, TriageDeps, TriageOptions};

/// Everything the service needs, assembled from validated settings.
pub struct TriageRuntime {
    pub settings: Settings,
    pub triage: Arc<Triage>,
}

impl TriageRuntime {
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = Settings::from_env().context("invalid configuration")?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let knowledge = KnowledgeBase::load_from_file(&settings.knowledge_base_path)
            .with_context(|| {
                format!(
                    "loading knowledge base {}",
                    settings.knowledge_base_path.display()
                )
            })?;
        let detector = match &settings.injection_patterns_path {
            Some(path) => InjectionDetector::from_file(path)?,
            None => InjectionDetector::with_defaults()?,
        };
        let classifier = build_classifier(&settings.classifier)?;
        let sink = build_sink(settings.discord_webhook_url.as_deref());
        let security = SecurityLog::open("security", &settings.security_log_path)
            .with_context(|| format!("opening {}", settings.security_log_path.display()))?;
        let support = SupportLog::open("support", &settings.support_log_path)
            .with_context(|| format!("opening {}", settings.support_log_path.display()))?;

        // Safe diagnostics only: provider, thresholds, counts.
        info!(
            provider = settings.classifier.provider.as_str(),
            model = %settings.classifier.model,
            sink = sink.name(),
            faqs = knowledge.len(),
            patterns = detector.len(),
            confidence_threshold = settings.confidence_threshold,
            partial_hint_threshold = settings.partial_hint_threshold,
            delay_secs = settings.response_delay_secs,
            "triage runtime ready"
        );

        let options = TriageOptions::from_settings(&settings)?;
        let triage = Triage::new(
            options,
            TriageDeps {
                knowledge: Arc::new(knowledge),
                detector,
                classifier,
                sink,
                security: Arc::new(security),
                support: Arc::new(support),
            },
        );
        Ok(Self {
            settings,
            triage: Arc::new(triage),
        })
    }
}
