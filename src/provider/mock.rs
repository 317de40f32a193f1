//! Offline provider with deterministic replies.
//!
//! Selected with `AITERM_USE_MOCK` so the binary can be exercised without
//! network access or an API key.

use super::{Provider, ProviderKind, TextStream};
use crate::conversation::Conversation;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

enum Replies {
    /// Keyword-matched canned answers.
    Canned,
    /// Exact replies handed out in order.
    Scripted(Mutex<VecDeque<String>>),
}

pub struct MockProvider {
    replies: Replies,
    fail_stream: bool,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl MockProvider {
    pub fn canned() -> Self {
        Self::with_replies(Replies::Canned)
    }

    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = replies.into_iter().map(Into::into).collect();
        Self::with_replies(Replies::Scripted(Mutex::new(queue)))
    }

    fn with_replies(replies: Replies) -> Self {
        Self {
            replies,
            fail_stream: false,
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    /// Streams break after the first chunk, so callers must fall back to
    /// [`Provider::complete`], which then consumes the reply.
    pub fn with_failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, prompt: &str, consume: bool) -> Result<String> {
        match &self.replies {
            Replies::Canned => Ok(canned_reply(prompt)),
            Replies::Scripted(queue) => {
                let mut queue = queue
                    .lock()
                    .map_err(|_| anyhow!("mock reply queue poisoned"))?;
                let reply = if consume {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                reply.ok_or_else(|| anyhow!("mock provider has no scripted reply left"))
            }
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn stream(&self, history: &Conversation, prompt: &str) -> Result<TextStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        debug!(turns = history.len(), "mock stream");

        let reply = self.next_reply(prompt, !self.fail_stream)?;
        let mut chunks: Vec<Result<String>> = reply
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        if self.fail_stream {
            chunks.truncate(1);
            chunks.push(Err(anyhow!("connection reset by mock")));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn complete(&self, history: &Conversation, prompt: &str) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        debug!(turns = history.len(), "mock complete");
        self.next_reply(prompt, true)
    }
}

fn canned_reply(prompt: &str) -> String {
    let prompt = prompt.to_lowercase();
    if prompt.contains("list") && prompt.contains("file") {
        "```bash\nls\n```".to_string()
    } else if prompt.contains("go up") || prompt.contains("parent") {
        "```bash\ncd ..\n```".to_string()
    } else if prompt.contains("hello") || prompt.contains("greet") {
        "```bash\necho hello from aiterm\n```".to_string()
    } else if prompt.contains("where am i") || prompt.contains("current directory") {
        "```bash\npwd\n```".to_string()
    } else {
        format!("Mock reply to: {prompt}")
    }
}
