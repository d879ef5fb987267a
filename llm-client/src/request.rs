use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::params::GenerationParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// What the caller sends: a bare prompt or a full message sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Prompt(String),
    Messages(Vec<Message>),
}

impl Input {
    /// Normalize into a message sequence; a prompt becomes one user message.
    pub fn to_messages(&self) -> Vec<Message> {
        match self {
            Self::Prompt(prompt) => vec![Message::user(prompt.clone())],
            Self::Messages(messages) => messages.clone(),
        }
    }

    /// The text that stands for this input as a user turn in history
    pub fn user_text(&self) -> &str {
        match self {
            Self::Prompt(prompt) => prompt,
            Self::Messages(messages) => messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Prompt(prompt) if prompt.trim().is_empty() => {
                Err(LlmError::Validation("prompt is empty".into()))
            }
            Self::Messages(messages) if messages.is_empty() => {
                Err(LlmError::Validation("no prompt or messages given".into()))
            }
            _ => Ok(()),
        }
    }
}

/// A request as seen by [`crate::Client`]
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub input: Input,
    pub params: GenerationParams,
    /// Prepend recorded interactions as chat context
    pub use_history: bool,
    /// How many recorded interactions to prepend; all when `None`
    pub history_depth: Option<usize>,
    pub save_to_history: bool,
}

impl Request {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            params: GenerationParams::default(),
            use_history: false,
            history_depth: None,
            save_to_history: true,
        }
    }

    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::new(Input::Prompt(prompt.into()))
    }

    pub fn messages(messages: Vec<Message>) -> Self {
        Self::new(Input::Messages(messages))
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_history(mut self, depth: Option<usize>) -> Self {
        self.use_history = true;
        self.history_depth = depth;
        self
    }

    pub fn without_saving(mut self) -> Self {
        self.save_to_history = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_becomes_single_user_message() {
        let input = Input::Prompt("hello".into());
        assert_eq!(input.to_messages(), vec![Message::user("hello")]);
        assert_eq!(input.user_text(), "hello");
    }

    #[test]
    fn test_user_text_picks_last_user_turn() {
        let input = Input::Messages(vec![
            Message::system("be brief"),
            Message::user("first"),
            Message::assistant("ok"),
            Message::user("second"),
        ]);
        assert_eq!(input.user_text(), "second");
    }

    #[test]
    fn test_validation() {
        assert!(Input::Prompt("  ".into()).validate().is_err());
        assert!(Input::Messages(vec![]).validate().is_err());
        assert!(Input::Prompt("ping".into()).validate().is_ok());
    }

    #[test]
    fn test_request_defaults() {
        let request = Request::prompt("hi");
        assert!(request.save_to_history);
        assert!(!request.use_history);

        let request = request.with_history(Some(2)).without_saving();
        assert!(request.use_history);
        assert_eq!(request.history_depth, Some(2));
        assert!(!request.save_to_history);
    }
}
