//! LLM driver abstraction
//!
//! The controller and the sandbox's nested `llm_query` capability both go
//! through [`LlmClient`]; the shared [`CallQuota`] keeps a session within
//! its call and token ceilings.

mod gemini;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::{Error, Result};

pub use gemini::GeminiClient;

/// One completion request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the driver for a JSON object response
    pub json_response: bool,
    pub max_output_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            json_response: false,
            max_output_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_json_response(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// Token accounting reported by the driver
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One completion response
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// A single-shot LLM driver.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<Completion>;
}

/// Per-session LLM budget shared between the controller and the sandbox
/// interceptor. Counters only go up; the session terminates gracefully
/// once either ceiling is reached.
#[derive(Debug)]
pub struct CallQuota {
    max_calls: u32,
    max_tokens: u64,
    calls: AtomicU32,
    tokens: AtomicU64,
}

impl CallQuota {
    pub fn new(max_calls: u32, max_tokens: u64) -> Self {
        Self {
            max_calls,
            max_tokens,
            calls: AtomicU32::new(0),
            tokens: AtomicU64::new(0),
        }
    }

    /// Reserve one call, failing with `BudgetExceeded` once either the call
    /// or the aggregated token ceiling is reached.
    pub fn acquire(&self) -> Result<()> {
        if self.tokens.load(Ordering::SeqCst) >= self.max_tokens {
            return Err(Error::BudgetExceeded(format!(
                "LLM token budget of {} exhausted",
                self.max_tokens
            )));
        }
        let used = self.calls.fetch_add(1, Ordering::SeqCst);
        if used >= self.max_calls {
            self.calls.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::BudgetExceeded(format!(
                "LLM call budget of {} exhausted",
                self.max_calls
            )));
        }
        Ok(())
    }

    /// Record observed token usage.
    pub fn record(&self, usage: &TokenUsage) {
        self.tokens.fetch_add(usage.total(), Ordering::SeqCst);
    }

    pub fn calls_used(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }
}
