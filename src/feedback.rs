//! Feedback tracker: which delivered answers still accept a 👍/👎 from the
//! original asker.
//!
//! Only the asker's first thumbs reaction counts; the ticket is consumed by
//! it. Reactions from anyone else, or other emoji, leave the ticket in place.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

const MAX_TICKETS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    ThumbsUp,
    ThumbsDown,
    Other,
}

impl Reaction {
    pub fn parse(emoji: &str) -> Self {
        // Strip skin-tone modifiers and variation selectors.
        let base: String = emoji
            .trim()
            .chars()
            .filter(|c| !matches!(*c, '\u{1F3FB}'..='\u{1F3FF}' | '\u{FE0F}'))
            .collect();
        match base.as_str() {
            "👍" | "+1" | "thumbsup" | ":thumbsup:" => Reaction::ThumbsUp,
            "👎" | "-1" | "thumbsdown" | ":thumbsdown:" => Reaction::ThumbsDown,
            _ => Reaction::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackTicket {
    pub request_id: String,
    pub channel_id: String,
    pub faq_id: String,
    pub user_id: String,
    pub username: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "feedback", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Helpful { faq_id: String },
    Escalated { faq_id: String },
    Ignored,
}

#[derive(Debug, Default)]
struct Tickets {
    by_message: HashMap<String, FeedbackTicket>,
    order: VecDeque<String>,
}

#[derive(Debug, Default)]
pub struct FeedbackTracker {
    inner: Mutex<Tickets>,
}

impl FeedbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tickets> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Track the answer posted as `message_id`. Oldest tickets are evicted
    /// past the cap.
    pub fn register(&self, message_id: impl Into<String>, ticket: FeedbackTicket) {
        let message_id = message_id.into();
        let mut t = self.lock();
        if t.by_message.insert(message_id.clone(), ticket).is_none() {
            t.order.push_back(message_id);
        }
        while t.order.len() > MAX_TICKETS {
            if let Some(old) = t.order.pop_front() {
                t.by_message.remove(&old);
            }
        }
    }

    /// Consume the ticket if `user_id` is the asker and the reaction is a
    /// thumbs up or down.
    pub fn take(
        &self,
        message_id: &str,
        user_id: &str,
        reaction: Reaction,
    ) -> Option<FeedbackTicket> {
        if reaction == Reaction::Other {
            return None;
        }
        let mut t = self.lock();
        if t.by_message.get(message_id)?.user_id != user_id {
            return None;
        }
        t.order.retain(|m| m != message_id);
        t.by_message.remove(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().by_message.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(user: &str) -> FeedbackTicket {
        FeedbackTicket {
            request_id: "r1".into(),
            channel_id: "c".into(),
            faq_id: "webhooks".into(),
            user_id: user.into(),
            username: "ana".into(),
            question: "q".into(),
        }
    }

    #[test]
    fn parses_reactions() {
        assert_eq!(Reaction::parse("👍"), Reaction::ThumbsUp);
        assert_eq!(Reaction::parse("👍🏽"), Reaction::ThumbsUp);
        assert_eq!(Reaction::parse("👎"), Reaction::ThumbsDown);
        assert_eq!(Reaction::parse("-1"), Reaction::ThumbsDown);
        assert_eq!(Reaction::parse("🎉"), Reaction::Other);
    }

    #[test]
    fn only_the_asker_counts_once() {
        let f = FeedbackTracker::new();
        f.register("m1", ticket("asker"));
        assert_eq!(f.take("m1", "someone", Reaction::ThumbsDown), None);
        assert_eq!(f.take("m1", "asker", Reaction::Other), None);
        assert!(f.take("m1", "asker", Reaction::ThumbsDown).is_some());
        assert_eq!(f.take("m1", "asker", Reaction::ThumbsUp), None);
        assert!(f.is_empty());
    }

    #[test]
    fn oldest_tickets_are_evicted() {
        let f = FeedbackTracker::new();
        for i in 0..(MAX_TICKETS + 3) {
            f.register(format!("m{i}"), ticket("u"));
        }
        assert_eq!(f.len(), MAX_TICKETS);
        assert_eq!(f.take("m0", "u", Reaction::ThumbsUp), None);
        assert!(f.take(&format!("m{}", MAX_TICKETS + 2), "u", Reaction::ThumbsUp).is_some());
    }
}
