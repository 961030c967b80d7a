//! Process-wide token accounting.

use std::sync::{Mutex, MutexGuard};

use sage_core::TokenUsage;

/// Emitted when cumulative usage reaches the configured share of the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdAlert {
    pub message: String,
    pub usage: TokenUsage,
    /// Configured threshold, in percent.
    pub threshold: u32,
    /// Usage as a percentage of the budget.
    pub percentage: f64,
}

/// Additive token counters shared by every analysis in the process.
///
/// # Examples
///
/// ```
/// use sage_analysis::usage::UsageTracker;
///
/// let tracker = UsageTracker::new();
/// tracker.record(6000, 2000);
/// assert!(tracker.check_threshold(10_000, 80).is_some());
/// ```
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: Mutex<TokenUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one request's consumption.
    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64) {
        let mut usage = self.lock();
        usage.add(prompt_tokens, completion_tokens);
        tracing::debug!(
            total = usage.total_tokens,
            requests = usage.request_count,
            "usage recorded"
        );
    }

    pub fn snapshot(&self) -> TokenUsage {
        *self.lock()
    }

    /// Total tokens as a percentage of `budget`; `0.0` for a zero budget.
    pub fn percentage(&self, budget: u64) -> f64 {
        self.snapshot().percentage_of(budget)
    }

    /// An alert when usage is at or above `threshold_percent` of `budget`.
    ///
    /// Once crossed, every later call alerts again.
    pub fn check_threshold(&self, budget: u64, threshold_percent: u32) -> Option<ThresholdAlert> {
        let usage = self.snapshot();
        let percentage = usage.percentage_of(budget);
        if percentage < f64::from(threshold_percent) {
            return None;
        }
        tracing::warn!(
            percentage,
            threshold = threshold_percent,
            total = usage.total_tokens,
            "token usage threshold reached"
        );
        Some(ThresholdAlert {
            message: format!("Token usage at {percentage:.1}% of configured threshold"),
            usage,
            threshold: threshold_percent,
            percentage,
        })
    }

    // A poisoned lock still holds plain counters.
    fn lock(&self) -> MutexGuard<'_, TokenUsage> {
        self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
