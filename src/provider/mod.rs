//! Model providers and the registry that selects one from configuration.
//!
//! A provider turns the conversation so far plus a new prompt into a reply,
//! either as a stream of text chunks or as one buffered response. The
//! session owns the [`Conversation`]; providers only read it.

pub mod gemini;
pub mod mock;

use crate::config::Config;
use crate::conversation::Conversation;
use crate::http_client::ReqwestHttpClient;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::fmt;
use std::io::Write;
use std::pin::Pin;
use tracing::{info, warn};

pub use gemini::GeminiProvider;
pub use mock::MockProvider;

/// Instructions sent as the first `model` turn of every conversation.
pub const SYSTEM_PROMPT: &str = "You are a command-line assistant for Linux, tuned for speed.

When the user asks for something that needs commands:
1. Reply with the command(s) only, inside one fenced ```bash code block.
2. The commands must run on Linux as a bash script.
3. Do not suggest destructive commands (for example rm -rf /) unless asked to.
4. Do not add explanations.

For anything else:
1. Answer directly and briefly.
2. Do not use code blocks unless asked to.";

/// Reply text delivered chunk by chunk.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Registered providers, keyed by their configuration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Mock,
}

impl ProviderKind {
    pub const ALL: &'static [ProviderKind] = &[ProviderKind::Gemini, ProviderKind::Mock];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Mock => "mock",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.id().eq_ignore_ascii_case(id))
    }

    /// Pick the provider for `config`: the mock flag first, then the
    /// explicit `provider` field, then the model family.
    pub fn for_config(config: &Config) -> Result<Self> {
        if config.use_mock {
            return Ok(Self::Mock);
        }
        match config.provider.as_deref() {
            Some(id) => Self::from_id(id).ok_or_else(|| anyhow!("unsupported provider: {id}")),
            None => {
                let family = model_family(&config.model);
                Self::from_id(family).ok_or_else(|| {
                    anyhow!(
                        "unsupported provider for model {}: no provider registered for family '{}'",
                        config.model,
                        family
                    )
                })
            }
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Leading segment of a model identifier, e.g. `gemini` for `gemini-2.0-flash`.
pub fn model_family(model: &str) -> &str {
    let model = model.trim();
    model.split(['-', '/', ':']).next().unwrap_or(model)
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Start a streamed reply to `prompt` given `history`.
    async fn stream(&self, history: &Conversation, prompt: &str) -> Result<TextStream>;

    /// Request the whole reply in one response.
    async fn complete(&self, history: &Conversation, prompt: &str) -> Result<String>;

    /// Drop everything but the priming turn.
    fn clear_history(&self, history: &mut Conversation) -> Result<()> {
        history.reset();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Send `prompt`, writing the reply to `out` as it streams in.
///
/// If the stream cannot be opened or breaks part way, a notice goes to `err`
/// and the prompt is retried once without streaming. The exchange is added
/// to `history` only when a reply was produced.
pub async fn send<W: Write, E: Write>(
    provider: &dyn Provider,
    history: &mut Conversation,
    prompt: &str,
    out: &mut W,
    err: &mut E,
) -> Result<String> {
    let reply = match stream_reply(provider, history, prompt, out).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(provider = %provider.kind(), error = %format!("{e:#}"), "streaming failed, falling back");
            writeln!(err, "\nStreaming error: {e:#}, falling back to non-streaming")?;
            let reply = provider
                .complete(history, prompt)
                .await
                .context("failed to generate content")?;
            write!(out, "{reply}")?;
            reply
        }
    };
    writeln!(out)?;
    out.flush()?;

    history.push_exchange(prompt, &reply);
    Ok(reply)
}

async fn stream_reply<W: Write>(
    provider: &dyn Provider,
    history: &Conversation,
    prompt: &str,
    out: &mut W,
) -> Result<String> {
    let mut stream = provider.stream(history, prompt).await?;
    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        write!(out, "{chunk}")?;
        out.flush()?;
        reply.push_str(&chunk);
    }
    Ok(reply)
}

/// Construct the provider selected by `config`.
pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let kind = ProviderKind::for_config(config)?;
    info!(provider = %kind, model = %config.model, "using provider");

    match kind {
        ProviderKind::Mock => Ok(Box::new(MockProvider::canned())),
        ProviderKind::Gemini => {
            let Some(api_key) = config.api_key(kind.id()) else {
                bail!(missing_key_message(kind));
            };
            let http = ReqwestHttpClient::new()?;
            Ok(Box::new(GeminiProvider::new(Box::new(http), api_key, config)))
        }
    }
}

fn missing_key_message(kind: ProviderKind) -> String {
    let var = Config::api_key_env_var(kind.id()).unwrap_or("the provider's API key variable");
    let path = Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "~/.aiterm".to_string());
    format!(
        "No API key found for provider '{kind}'. Set it using one of these methods:

1. Set environment variable:
   export {var}=your-key-here

2. Add it to the config file ({path}):
   \"api_keys\": {{ \"{kind}\": \"your-key-here\" }}"
    )
}
