//! Combiner error types

use thiserror::Error;

/// Errors that can occur while registering inputs or running the combiner
#[derive(Debug, Error)]
pub enum CombinerError {
    #[error("Invalid priority {priority}: must be a finite, non-negative number")]
    InvalidPriority { priority: f64 },

    #[error("Combiner has been stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Output rendezvous closed")]
    OutputClosed,

    #[error("Dispatch channel closed")]
    DispatchClosed,
}

impl CombinerError {
    /// Check if this error was caused by bad caller input rather than runtime state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CombinerError::InvalidPriority { .. } | CombinerError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_priority_message() {
        let err = CombinerError::InvalidPriority { priority: -1.5 };

        let msg = err.to_string();
        assert!(msg.contains("-1.5"));
        assert!(msg.contains("non-negative"));
    }

    #[test]
    fn test_is_validation() {
        assert!(CombinerError::InvalidPriority { priority: f64::NAN }.is_validation());
        assert!(CombinerError::InvalidConfig("batch_size".to_string()).is_validation());
        assert!(!CombinerError::Stopped.is_validation());
        assert!(!CombinerError::OutputClosed.is_validation());
        assert!(!CombinerError::DispatchClosed.is_validation());
    }
}
