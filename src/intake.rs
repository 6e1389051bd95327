//! Intake filter: decides which platform messages become support requests.
//!
//! Order of checks: bot author, channel, team member, `!` command, blank
//! text, knowledge-base skip pattern. A team member's message is not triaged;
//! it is reported as a staff reply so pending answers in that channel can be
//! cancelled.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::knowledge::KnowledgeBase;

/// Message event as delivered by the chat gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMessage {
    pub message_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_bot: bool,
}

/// One user question entering the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub request_id: String,
    pub user_id: String,
    pub username: String,
    pub channel_id: String,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BotAuthor,
    OtherChannel,
    Command,
    Blank,
    SkipPattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    Triage(IncomingRequest),
    StaffReply {
        channel_id: String,
        at: DateTime<Utc>,
    },
    Skip(SkipReason),
}

#[derive(Debug, Clone)]
pub struct IntakeFilter {
    support_channel_id: String,
    team: HashSet<String>,
}

impl IntakeFilter {
    /// Team usernames are compared case-insensitively.
    pub fn new<I, S>(support_channel_id: impl Into<String>, team_usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            support_channel_id: support_channel_id.into(),
            team: team_usernames
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn support_channel_id(&self) -> &str {
        &self.support_channel_id
    }

    pub fn is_team_member(&self, username: &str) -> bool {
        self.team.contains(&username.trim().to_lowercase())
    }

    /// `now` stands in for a missing message timestamp.
    pub fn classify(&self, msg: PlatformMessage, kb: &KnowledgeBase, now: DateTime<Utc>) -> Intake {
        if msg.is_bot {
            return Intake::Skip(SkipReason::BotAuthor);
        }
        if msg.channel_id != self.support_channel_id {
            return Intake::Skip(SkipReason::OtherChannel);
        }
        let at = msg.timestamp.unwrap_or(now);
        let is_staff = self.is_team_member(&msg.username)
            || kb
                .team_usernames()
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(msg.username.trim()));
        if is_staff {
            return Intake::StaffReply {
                channel_id: msg.channel_id,
                at,
            };
        }
        let trimmed = msg.text.trim();
        if trimmed.starts_with('!') {
            return Intake::Skip(SkipReason::Command);
        }
        if trimmed.is_empty() {
            return Intake::Skip(SkipReason::Blank);
        }
        if kb.matches_skip_pattern(trimmed) {
            return Intake::Skip(SkipReason::SkipPattern);
        }
        Intake::Triage(IncomingRequest {
            request_id: msg.message_id,
            user_id: msg.user_id,
            username: msg.username,
            channel_id: msg.channel_id,
            raw_text: msg.text,
            timestamp: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn msg(user: &str, channel: &str, text: &str) -> PlatformMessage {
        PlatformMessage {
            message_id: "m1".into(),
            channel_id: channel.into(),
            user_id: format!("id-{user}"),
            username: user.into(),
            text: text.into(),
            timestamp: None,
            is_bot: false,
        }
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::from_json_str(
            r#"{"faqs": [], "team_usernames": ["Mablanc"], "skip_patterns": ["dm me"]}"#,
        )
        .unwrap()
    }

    #[test]
    fn ordinary_question_is_triaged() {
        let f = IntakeFilter::new("support", ["alice"]);
        match f.classify(msg("bob", "support", "How do webhooks work?"), &kb(), now()) {
            Intake::Triage(r) => {
                assert_eq!(r.request_id, "m1");
                assert_eq!(r.timestamp, now());
                assert_eq!(r.user_id, "id-bob");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn staff_from_settings_or_knowledge_base() {
        let f = IntakeFilter::new("support", ["Alice"]);
        assert!(matches!(
            f.classify(msg("alice", "support", "on it"), &kb(), now()),
            Intake::StaffReply { .. }
        ));
        assert!(matches!(
            f.classify(msg("mablanc", "support", "checking"), &kb(), now()),
            Intake::StaffReply { .. }
        ));
    }

    #[test]
    fn skips() {
        let f = IntakeFilter::new("support", Vec::<String>::new());
        let mut bot = msg("bot", "support", "hi");
        bot.is_bot = true;
        assert_eq!(f.classify(bot, &kb(), now()), Intake::Skip(SkipReason::BotAuthor));
        assert_eq!(
            f.classify(msg("bob", "general", "hi"), &kb(), now()),
            Intake::Skip(SkipReason::OtherChannel)
        );
        assert_eq!(
            f.classify(msg("bob", "support", "!help"), &kb(), now()),
            Intake::Skip(SkipReason::Command)
        );
        assert_eq!(
            f.classify(msg("bob", "support", "   "), &kb(), now()),
            Intake::Skip(SkipReason::Blank)
        );
        assert_eq!(
            f.classify(msg("bob", "support", "can someone DM me?"), &kb(), now()),
            Intake::Skip(SkipReason::SkipPattern)
        );
    }
}
