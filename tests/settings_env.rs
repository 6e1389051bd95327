// tests/settings_env.rs
// Settings and runtime bootstrap from the process environment.
// Tests are #[serial] because they mutate process env.

use std::env;
use std::path::Path;

use serial_test::serial;

use support_triage::config::{ConfigError, ProviderKind, Settings};
use support_triage::TriageRuntime;

/// Small RAII helper to snapshot & restore env vars in each test.
struct EnvSnapshot {
    saved: Vec<(String, Option<String>)>,
}
impl EnvSnapshot {
    /// Provide a list of (KEY, Some(VALUE)) to set, or (KEY, None) to remove.
    fn set(pairs: &[(&str, Option<&str>)]) -> Self {
        let mut saved = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = k.to_string();
            saved.push((key.clone(), env::var(k).ok()));
            match v {
                Some(val) => env::set_var(&key, val),
                None => env::remove_var(&key),
            }
        }
        Self { saved }
    }
}
impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (k, maybe_v) in self.saved.drain(..) {
            match maybe_v {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
    }
}

fn fixture_kb() -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/knowledge_base.json")
        .display()
        .to_string()
}

#[test]
#[serial]
fn mock_mode_needs_no_api_key() {
    let _env = EnvSnapshot::set(&[
        ("SUPPORT_CHANNEL_ID", Some("998877")),
        ("AI_TEST_MODE", Some("mock")),
        ("CLASSIFIER_PROVIDER", None),
        ("ANTHROPIC_API_KEY", None),
        ("CONFIDENCE_THRESHOLD", Some("0.6")),
        ("PARTIAL_HINT_THRESHOLD", None),
    ]);
    let s = Settings::from_env().expect("settings");
    assert_eq!(s.classifier.provider, ProviderKind::Mock);
    assert_eq!(s.support_channel_id, "998877");
    assert_eq!(s.confidence_threshold, 0.6);
    assert_eq!(s.partial_hint_threshold, 0.3);
}

#[test]
#[serial]
fn anthropic_without_key_is_fatal() {
    let _env = EnvSnapshot::set(&[
        ("SUPPORT_CHANNEL_ID", Some("998877")),
        ("AI_TEST_MODE", None),
        ("CLASSIFIER_PROVIDER", Some("anthropic")),
        ("ANTHROPIC_API_KEY", None),
    ]);
    assert_eq!(
        Settings::from_env().unwrap_err(),
        ConfigError::Missing("ANTHROPIC_API_KEY")
    );
}

#[test]
#[serial]
fn unknown_provider_is_fatal() {
    let _env = EnvSnapshot::set(&[
        ("SUPPORT_CHANNEL_ID", Some("998877")),
        ("AI_TEST_MODE", None),
        ("CLASSIFIER_PROVIDER", Some("gemini")),
    ]);
    assert!(matches!(
        Settings::from_env(),
        Err(ConfigError::UnknownProvider(_))
    ));
}

#[tokio::test]
#[serial]
async fn runtime_boots_from_env_and_writes_logs_under_the_given_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let security = dir.path().join("logs/security.jsonl");
    let support = dir.path().join("logs/support.jsonl");
    let kb = fixture_kb();
    let _env = EnvSnapshot::set(&[
        ("SUPPORT_CHANNEL_ID", Some("support")),
        ("AI_TEST_MODE", Some("mock")),
        ("KNOWLEDGE_BASE_PATH", Some(kb.as_str())),
        ("INJECTION_PATTERNS_PATH", None),
        ("SECURITY_LOG_PATH", Some(security.to_str().expect("utf8 path"))),
        ("SUPPORT_LOG_PATH", Some(support.to_str().expect("utf8 path"))),
        ("DISCORD_WEBHOOK_URL", None),
        ("TEAM_USERNAMES", Some("alice")),
    ]);

    let rt = TriageRuntime::from_env().expect("runtime");
    assert_eq!(rt.triage.knowledge().len(), 4);
    assert_eq!(rt.triage.provider_name(), "mock");
    assert!(security.exists());
    assert!(support.exists());
}

#[test]
#[serial]
fn missing_knowledge_base_fails_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.json");
    let logs = dir.path().join("security.jsonl");
    let _env = EnvSnapshot::set(&[
        ("SUPPORT_CHANNEL_ID", Some("support")),
        ("AI_TEST_MODE", Some("mock")),
        ("KNOWLEDGE_BASE_PATH", Some(missing.to_str().expect("utf8 path"))),
        ("SECURITY_LOG_PATH", Some(logs.to_str().expect("utf8 path"))),
    ]);
    let err = TriageRuntime::from_env().err().expect("must fail");
    assert!(format!("{err:#}").contains("nope.json"));
}
