//! Deterministic generator that replays canned replies in order.
//!
//! Used for offline runs and tests. Every call is recorded so tests can
//! assert on the prompts and temperatures a phase used.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerateOptions, Message, TextGenerator};
use crate::errors::LlmError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: GenerateOptions,
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply after the existing ones.
    pub fn push(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let call = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| LlmError::Transport("scripted generator lock poisoned".into()))?;
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                options: options.clone(),
            });
            calls.len()
        };
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| LlmError::Transport("scripted generator lock poisoned".into()))?;
        replies.pop_front().ok_or(LlmError::ScriptExhausted { call })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_records_calls() {
        let generator = ScriptedGenerator::new(["one", "two"]);
        let opts = GenerateOptions::with_temperature(0.0);
        assert_eq!(
            generator.generate(&[Message::user("a")], &opts).await.unwrap(),
            "one"
        );
        assert_eq!(
            generator
                .generate(&[Message::user("b")], &GenerateOptions::default())
                .await
                .unwrap(),
            "two"
        );
        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].options.temperature, Some(0.0));
        assert_eq!(calls[1].messages[0].content, "b");
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let generator = ScriptedGenerator::new(Vec::<String>::new());
        let err = generator
            .generate(&[Message::user("a")], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ScriptExhausted { call: 1 }));
        generator.push("late");
        assert_eq!(generator.remaining(), 1);
    }
}
