//! Error types for the flow manager.

use thiserror::Error;

/// Flow manager errors.
///
/// Admission rejections are not represented here; they are a normal
/// outcome of intake (see [`crate::Rejection`]).
#[derive(Error, Debug)]
pub enum FlowError {
    /// The flow table has no room for a new entry.
    #[error("Flow table full: {limit} entries")]
    TableFull { limit: usize },

    /// Datapath program installation failed
    #[error("Datapath error: {0}")]
    Datapath(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The scheduler task is gone
    #[error("Flow scheduler stopped")]
    SchedulerStopped,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Returns true if the process cannot continue without a usable flow table.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::TableFull { .. })
    }
}

/// Result type for flow manager operations
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let err = FlowError::TableFull { limit: 16 };
        assert_eq!(err.to_string(), "Flow table full: 16 entries");

        let err = FlowError::Datapath("map update failed".to_string());
        assert_eq!(err.to_string(), "Datapath error: map update failed");
    }

    #[test]
    fn test_only_exhaustion_is_fatal() {
        assert!(FlowError::TableFull { limit: 1 }.is_fatal());
        assert!(!FlowError::Datapath("x".to_string()).is_fatal());
        assert!(!FlowError::Configuration("x".to_string()).is_fatal());
        assert!(!FlowError::SchedulerStopped.is_fatal());
    }
}
