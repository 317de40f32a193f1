//! Conversation history passed explicitly to every provider call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Ordered log of user/model turns.
///
/// A primed conversation starts with a single `model` turn carrying the
/// system instructions; [`Conversation::reset`] keeps that turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
    primed: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primed(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::model(system_prompt)],
            primed: true,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record a completed exchange. Empty replies only record the prompt.
    pub fn push_exchange(&mut self, prompt: &str, reply: &str) {
        self.turns.push(Turn::user(prompt));
        if !reply.is_empty() {
            self.turns.push(Turn::model(reply));
        }
    }

    pub fn reset(&mut self) {
        if self.primed {
            self.turns.truncate(1);
        } else {
            self.turns.clear();
        }
    }
}
