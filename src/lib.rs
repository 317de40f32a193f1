//! aiterm - an AI assistant for the terminal.
//!
//! Natural-language requests go to a language model; when the reply carries a
//! shell block, the block is staged as a script, shown to the user, and run
//! on confirmation. The library provides:
//!
//! - **Conversation** with a model provider, streamed as it arrives
//! - **Script extraction** from fenced code blocks in replies
//! - **Virtual working directory** tracking across spawned shells
//! - **Script staging** in self-cleaning temporary files
//! - **Review and execution** of staged scripts
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration file, environment overrides, validation
//! - [`http_client`] - HTTP client abstraction
//! - [`sse`] - Server-sent event decoding for streamed replies
//! - [`conversation`] - Conversation history owned by the session
//! - [`provider`] - Provider registry, Gemini and mock providers
//! - [`extract`] - Shell block extraction
//! - [`directory`] - Virtual working directory and `cd` detection
//! - [`staging`] - Temporary script files
//! - [`executor`] - Runs commands, scripts and the editor
//! - [`review`] - Script display and confirmation
//! - [`session`] - The interactive loop
//!
//! # Example
//!
//! ```no_run
//! use aiterm::config::Config;
//! use aiterm::provider;
//! use aiterm::session::Session;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let provider = provider::build(&config)?;
//!     Session::new(provider)?.run().await
//! }
//! ```

pub mod config;
pub mod conversation;
pub mod directory;
pub mod executor;
pub mod extract;
pub mod http_client;
pub mod provider;
pub mod review;
pub mod session;
pub mod sse;
pub mod staging;
