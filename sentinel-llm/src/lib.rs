//! SENTINEL LLM - Caller Capability
//!
//! Backend-agnostic interface for chat-completions calls. The core never
//! inspects a backend's identity; any transport that can turn a message
//! list into text plugs in here. Calls are the only suspension points in
//! the whole engine, and every call is bounded by a deadline.

use async_trait::async_trait;
use sentinel_core::{CallError, ChatMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// CALL OPTIONS
// ============================================================================

/// Options for one chat-completions call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Maximum tokens the backend may generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature; `None` leaves the backend default
    pub temperature: Option<f32>,
    /// Hard deadline for the call
    pub timeout: Duration,
}

impl CallOptions {
    /// Options with the given deadline and backend defaults otherwise.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            max_tokens: None,
            temperature: None,
            timeout,
        }
    }

    /// Set the generation cap.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(60))
    }
}

// ============================================================================
// CALLER TRAIT
// ============================================================================

/// Capability for issuing one chat-completions call.
///
/// Implementations must be thread-safe (Send + Sync). Cancellation is
/// cooperative: dropping the returned future abandons the call, and
/// [`call_bounded`] enforces the deadline in `options.timeout`.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    /// Send the messages and return the generated text.
    async fn call(&self, messages: &[ChatMessage], options: &CallOptions)
        -> Result<String, CallError>;
}

/// Issue a call with the deadline in `options.timeout` enforced.
///
/// A deadline overrun maps to [`CallError::Timeout`]; an empty response
/// body maps to [`CallError::EmptyResponse`].
pub async fn call_bounded(
    caller: &dyn LlmCaller,
    messages: &[ChatMessage],
    options: &CallOptions,
) -> Result<String, CallError> {
    let deadline = options.timeout;
    let text = tokio::time::timeout(deadline, caller.call(messages, options))
        .await
        .map_err(|_| CallError::Timeout { after: deadline })??;

    if text.trim().is_empty() {
        return Err(CallError::EmptyResponse);
    }
    Ok(text)
}

// ============================================================================
// TESTS
// ============================================================================
