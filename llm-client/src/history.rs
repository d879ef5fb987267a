//! Bounded interaction history used for multi-shot context

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::config::DEFAULT_HISTORY_SIZE;
use crate::request::{Input, Message};
use crate::response::Response;

/// One recorded prompt/response pair. Immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    input: Input,
    response: Response,
    timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(input: Input, response: Response) -> Self {
        Self {
            input,
            response,
            timestamp: Utc::now(),
        }
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Render as a user turn followed by an assistant turn
    pub fn to_messages(&self) -> [Message; 2] {
        let reply = match self.response.error() {
            Some(error) => format!("[error] {}", error.message),
            None => self.response.content().to_string(),
        };
        [
            Message::user(self.input.user_text()),
            Message::assistant(reply),
        ]
    }
}

/// Fixed-capacity FIFO log. Appends go to the tail; once full, the oldest
/// entry is evicted from the head.
#[derive(Debug, Clone)]
pub struct InteractionHistory {
    capacity: usize,
    entries: VecDeque<Interaction>,
}

impl Default for InteractionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl InteractionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_SIZE)),
        }
    }

    pub fn record(&mut self, interaction: Interaction) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(interaction);
    }

    /// The last `n` interactions, oldest first; all of them when `n` is `None`
    pub fn recent(&self, n: Option<usize>) -> Vec<Interaction> {
        let n = n.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - n)
            .cloned()
            .collect()
    }

    /// The last `n` interactions as alternating user/assistant messages
    pub fn as_messages(&self, n: Option<usize>) -> Vec<Message> {
        self.recent(n)
            .iter()
            .flat_map(Interaction::to_messages)
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ResponseError};
    use crate::request::Role;
    use crate::response::Completion;
    use proptest::prelude::*;

    fn interaction(prompt: &str) -> Interaction {
        Interaction::new(
            Input::Prompt(prompt.to_string()),
            Response::success("mock", "mock-model", Completion::new(format!("re: {}", prompt))),
        )
    }

    fn prompts(history: &InteractionHistory) -> Vec<String> {
        history
            .recent(None)
            .iter()
            .map(|i| i.input().user_text().to_string())
            .collect()
    }

    #[test]
    fn test_capacity_two_keeps_last_two() {
        let mut history = InteractionHistory::new(2);
        history.record(interaction("A"));
        history.record(interaction("B"));
        history.record(interaction("C"));

        assert_eq!(prompts(&history), vec!["B", "C"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_recent_n() {
        let mut history = InteractionHistory::new(10);
        for p in ["a", "b", "c"] {
            history.record(interaction(p));
        }
        let last_two: Vec<_> = history
            .recent(Some(2))
            .iter()
            .map(|i| i.input().user_text().to_string())
            .collect();
        assert_eq!(last_two, vec!["b", "c"]);
        assert_eq!(history.recent(Some(10)).len(), 3);
        assert!(history.recent(Some(0)).is_empty());
    }

    #[test]
    fn test_as_messages_alternates_roles() {
        let mut history = InteractionHistory::new(10);
        history.record(interaction("one"));
        history.record(Interaction::new(
            Input::Prompt("two".into()),
            Response::failure(
                "mock",
                "mock-model",
                ResponseError::new(ErrorKind::BackendRequest, "timeout"),
            ),
        ));

        let messages = history.as_messages(None);
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(messages[1].content, "re: one");
        assert_eq!(messages[3].content, "[error] timeout");
    }

    #[test]
    fn test_clear_and_zero_capacity() {
        let mut history = InteractionHistory::new(3);
        history.record(interaction("x"));
        history.clear();
        assert!(history.is_empty());

        let mut disabled = InteractionHistory::new(0);
        disabled.record(interaction("x"));
        assert!(disabled.is_empty());
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity_and_keeps_tail(capacity in 1usize..16, count in 0usize..64) {
            let mut history = InteractionHistory::new(capacity);
            for i in 0..count {
                history.record(interaction(&i.to_string()));
                prop_assert!(history.len() <= capacity);
            }

            let expected: Vec<String> = (count.saturating_sub(capacity)..count)
                .map(|i| i.to_string())
                .collect();
            prop_assert_eq!(prompts(&history), expected);
        }
    }
}
