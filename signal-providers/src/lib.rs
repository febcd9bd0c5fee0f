//! Signal Providers
//!
//! Everything a single trading-signal source needs:
//! - `SignalProvider` capability trait and the shared per-provider state
//! - Typed provider errors and retry with exponential backoff
//! - Prompt construction and tolerant parsing of model answers
//! - HTTP providers for Anthropic, Gemini and OpenAI-compatible APIs,
//!   built through a kind-keyed factory

pub mod anthropic;
pub mod error;
pub mod factory;
pub mod gemini;
mod http;
pub mod openai;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod retry;

pub use anthropic::{AnthropicProvider, ANTHROPIC_BASE_URL};
pub use error::ProviderError;
pub use factory::ProviderFactory;
pub use gemini::{GeminiProvider, GEMINI_BASE_URL};
pub use openai::{OpenAiCompatibleProvider, GROK_BASE_URL, OPENAI_BASE_URL};
pub use parse::{parse_signal, validate_response, ParsedSignal};
pub use prompt::build_prompt;
pub use provider::{
    ProviderConfig, ProviderConstructor, ProviderHandle, ProviderSnapshot, ProviderState,
    ProviderStatus, SignalProvider,
};
pub use retry::{retry_with_backoff, RetryPolicy};
