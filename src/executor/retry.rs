// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Timeout and retry for a single logical AI call.
//!
//! A call gets one attempt at the configured timeout. If that attempt times
//! out, it is retried exactly once with double the timeout; a second timeout
//! is final. An invoker that answers with `success: false` is not retried.

use std::time::Duration;

use crate::invoker::{AiInvoker, InvokeOptions, InvokeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryState {
    First,
    Retry,
}

impl RetryState {
    fn deadline_ms(self, base_ms: u64) -> u64 {
        match self {
            RetryState::First => base_ms,
            RetryState::Retry => base_ms.saturating_mul(2),
        }
    }
}

/// How a logical call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The invoker answered (successfully or not) within the deadline.
    Completed(InvokeResult),

    /// Both attempts timed out.
    TimedOut { timeout_ms: u64 },
}

/// Outcome plus the number of invoker calls it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReport {
    pub outcome: CallOutcome,
    pub attempts: usize,
}

impl CallOutcome {
    /// Message recorded on items whose call timed out.
    pub fn timeout_message(timeout_ms: u64) -> String {
        format!("AI call timed out after {}ms (retried once)", timeout_ms)
    }
}

/// Invoke with the timeout/retry policy.
pub async fn invoke_with_retry(
    invoker: &dyn AiInvoker,
    prompt: &str,
    model: Option<String>,
    timeout_ms: u64,
) -> CallReport {
    let mut state = RetryState::First;
    let mut attempts = 0;

    loop {
        let deadline = state.deadline_ms(timeout_ms);
        attempts += 1;

        let options = InvokeOptions::new(model.clone(), Some(deadline));
        let call = invoker.invoke(prompt, options);

        match tokio::time::timeout(Duration::from_millis(deadline), call).await {
            Ok(result) => {
                return CallReport {
                    outcome: CallOutcome::Completed(result),
                    attempts,
                };
            }
            Err(_) => match state {
                RetryState::First => {
                    tracing::warn!("AI call timed out after {}ms, retrying once", deadline);
                    state = RetryState::Retry;
                }
                RetryState::Retry => {
                    tracing::warn!("AI call timed out again after {}ms", deadline);
                    return CallReport {
                        outcome: CallOutcome::TimedOut { timeout_ms: deadline },
                        attempts,
                    };
                }
            },
        }
    }
}
