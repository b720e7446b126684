//! Retry and escalation policy for tasks whose execution raised.

use crate::core::types::TaskStatus;

/// What to do with a task after its executor raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the task to `pending` with the incremented counter.
    Retry { retries: u32 },
    /// Mark the task `failed` and escalate to the model with code context.
    Escalate { retries: u32 },
}

impl RetryDecision {
    pub fn status(self) -> TaskStatus {
        match self {
            RetryDecision::Retry { .. } => TaskStatus::Pending,
            RetryDecision::Escalate { .. } => TaskStatus::Failed,
        }
    }

    pub fn retries(self) -> u32 {
        match self {
            RetryDecision::Retry { retries } | RetryDecision::Escalate { retries } => retries,
        }
    }
}

/// Retry cap: a task gets one initial attempt plus `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    /// Decide the transition after a failed attempt by a task with `retries` so far.
    ///
    /// The counter never exceeds `max_retries`; the attempt after the last retry
    /// escalates with the counter unchanged.
    pub fn after_failure(&self, retries: u32) -> RetryDecision {
        let next = retries.saturating_add(1);
        if next <= self.max_retries {
            RetryDecision::Retry { retries: next }
        } else {
            RetryDecision::Escalate {
                retries: self.max_retries.min(retries),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_retries_then_escalate() {
        let policy = RetryPolicy::default();
        let mut retries = 0;
        let mut decisions = Vec::new();
        loop {
            let decision = policy.after_failure(retries);
            decisions.push(decision);
            match decision {
                RetryDecision::Retry { retries: next } => retries = next,
                RetryDecision::Escalate { .. } => break,
            }
        }
        assert_eq!(
            decisions,
            vec![
                RetryDecision::Retry { retries: 1 },
                RetryDecision::Retry { retries: 2 },
                RetryDecision::Retry { retries: 3 },
                RetryDecision::Escalate { retries: 3 },
            ]
        );
        assert_eq!(decisions[3].status(), TaskStatus::Failed);
        assert_eq!(decisions[0].status(), TaskStatus::Pending);
    }

    #[test]
    fn custom_cap_is_respected() {
        let policy = RetryPolicy { max_retries: 1 };
        assert_eq!(policy.after_failure(0), RetryDecision::Retry { retries: 1 });
        assert_eq!(policy.after_failure(1), RetryDecision::Escalate { retries: 1 });
    }
}
