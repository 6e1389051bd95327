//! Owner probe: shows how a question would be triaged without the classifier.
//!
//! `cargo run --bin faq_probe -- "How do I verify my webhook signature?"`

use std::path::PathBuf;

use support_triage::config::{read_env, ENV_CONFIDENCE_THRESHOLD, ENV_PARTIAL_HINT_THRESHOLD};
use support_triage::gate::sanitize::{sanitize, DEFAULT_MAX_MESSAGE_LENGTH};
use support_triage::gate::{InjectionDetector, Scan};
use support_triage::knowledge::{
    KnowledgeBase, DEFAULT_KNOWLEDGE_BASE_PATH, ENV_KNOWLEDGE_BASE_PATH,
};
use support_triage::matching::match_keywords;
use support_triage::policy::{
    Action, ConfidencePolicy, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_PARTIAL_HINT_THRESHOLD,
};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        anyhow::bail!("usage: faq_probe <question>");
    }

    let path: PathBuf = read_env(
        ENV_KNOWLEDGE_BASE_PATH,
        PathBuf::from(DEFAULT_KNOWLEDGE_BASE_PATH),
    )?;
    let kb = KnowledgeBase::load_from_file(&path)?;
    let detector = InjectionDetector::with_defaults()?;
    let policy = ConfidencePolicy::new(
        read_env(ENV_CONFIDENCE_THRESHOLD, DEFAULT_CONFIDENCE_THRESHOLD)?,
        read_env(ENV_PARTIAL_HINT_THRESHOLD, DEFAULT_PARTIAL_HINT_THRESHOLD)?,
    )?;

    let clean = sanitize(&question, DEFAULT_MAX_MESSAGE_LENGTH);
    let m = match_keywords(&clean, &kb);

    println!("knowledge base: {} ({} entries)", path.display(), kb.len());
    match detector.scan(&clean) {
        Scan::Clean => println!("injection scan: clean"),
        Scan::Suspicious { pattern_id } => println!("injection scan: suspicious ({pattern_id})"),
    }
    println!(
        "keyword match:  {} (confidence {:.2})",
        m.faq_id.as_deref().unwrap_or("-"),
        m.confidence
    );
    match policy.decide(&m) {
        Action::Answer(id) => println!("action:         answer with `{id}`"),
        Action::Hint(id) => {
            let topic = kb.get(&id).map(|e| e.topic()).unwrap_or("this topic");
            println!("action:         hint about {topic}");
        }
        Action::Ignore => println!("action:         ignore"),
    }
    Ok(())
}
