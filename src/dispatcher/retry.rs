//! Retry policy for destination-chain submissions: exponential backoff with
//! a bounded attempt budget, plus error classification so permanent failures
//! stop burning attempts.

use std::time::Duration;

use crate::config::RelayerConfig;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of submission attempts per record
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn from_relayer_config(config: &RelayerConfig) -> Self {
        Self {
            max_attempts: config.max_dispatch_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: 2.0,
        }
    }

    /// Backoff before the retry following `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn should_retry(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_attempts
    }
}

/// Classifies submission errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issue) - retry with backoff
    Transient,
    /// The action already landed on chain (duplicate submission after a
    /// restart) - treat as settled, do not retry
    AlreadyProcessed,
    /// Permanent failure (revert, bad params) - do not retry
    Permanent,
    /// Unknown - retry with backoff
    Unknown,
}

/// Classify a submission error string
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        // Nonce conflicts mean another transaction from the authority raced
        // ours, not that this action landed. Retry; if a duplicate actually
        // lands, the contract's duplicate revert classifies below.
        || error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("underpriced")
    {
        return ErrorClass::Transient;
    }

    // Contract-level duplicate reverts: the destination contract itself
    // reports the action as done, which is proof it landed.
    if error_lower.contains("already minted") || error_lower.contains("already released") {
        return ErrorClass::AlreadyProcessed;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(10), Duration::from_secs(60)); // capped
    }

    #[test]
    fn test_attempt_budget() {
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert!(!config.should_retry(4));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
    }

    #[test]
    fn test_nonce_conflict_is_retried_not_settled() {
        // A raced nonce proves nothing about whether the action landed
        assert_eq!(classify_error("nonce too low: next nonce 7"), ErrorClass::Transient);
        assert_eq!(classify_error("already known"), ErrorClass::Transient);
        assert_eq!(classify_error("transaction underpriced"), ErrorClass::Transient);
    }

    #[test]
    fn test_contract_duplicate_revert_settles() {
        assert_eq!(
            classify_error("execution reverted: already minted"),
            ErrorClass::AlreadyProcessed
        );
        assert_eq!(
            classify_error("execution reverted: already released"),
            ErrorClass::AlreadyProcessed
        );
    }
}
