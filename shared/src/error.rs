//! # Error Types for the Fleet Provisioning Agent
//!
//! This module defines all error types used throughout the system,
//! providing detailed error information for debugging and logging.
//!
//! Every provisioning error is terminal for the attempt: nothing here is
//! retried internally, and only the binary entry point maps an error to a
//! process exit code.

use thiserror::Error;

/// Main error type for the entire system
#[derive(Error, Debug)]
pub enum ProvisionError {
    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================

    /// Transport failed to establish the broker connection
    #[error("Failed to connect to '{endpoint}': {reason}")]
    ConnectionError { endpoint: String, reason: String },

    /// A subscription was refused, or its acknowledgment never arrived
    #[error("Subscription to '{topic}' failed: {reason}")]
    SubscriptionError { topic: String, reason: String },

    /// A publish could not be sent, or its acknowledgment never arrived
    #[error("Publish to '{topic}' failed: {reason}")]
    PublishError { topic: String, reason: String },

    // =========================================================================
    // PROTOCOL ERRORS
    // =========================================================================

    /// The provisioning service explicitly rejected a request
    #[error("{operation} request rejected with code:'{error_code}' message:'{error_message}' statusCode:'{status_code}'")]
    ServiceRejected {
        operation: String,
        error_code: String,
        error_message: String,
        status_code: u16,
    },

    /// Neither an accepted nor a rejected response arrived within the bounded wait
    #[error("Timed out waiting for {expected} response after {attempts} polls")]
    Timeout { expected: String, attempts: u32 },

    /// A second response arrived for a request that was already answered
    #[error("Duplicate {operation} response received")]
    DuplicateResponse { operation: String },

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================

    /// Unable to write the permanent credential bundle
    #[error("Failed to persist credential bundle: {0}")]
    PersistenceError(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================

    /// Configuration file, machine identity, or config values are unusable
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // =========================================================================
    // GENERIC ERRORS
    // =========================================================================

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias using ProvisionError
pub type ProvisionResult<T> = Result<T, ProvisionError>;

// =============================================================================
// ERROR CONVERSIONS
// =============================================================================

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionError::SerializationError(err.to_string())
    }
}

// =============================================================================
// ERROR CATEGORIES (for logging)
// =============================================================================

impl ProvisionError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProvisionError::ConnectionError { .. }
            | ProvisionError::SubscriptionError { .. }
            | ProvisionError::PublishError { .. } => "transport",

            ProvisionError::ServiceRejected { .. }
            | ProvisionError::Timeout { .. }
            | ProvisionError::DuplicateResponse { .. } => "protocol",

            ProvisionError::PersistenceError(_) => "storage",

            ProvisionError::ConfigurationError(_) => "config",

            ProvisionError::SerializationError(_) => "internal",
        }
    }

    /// Check whether simply re-running the agent may succeed.
    ///
    /// Rejections and local state problems need operator changes first;
    /// transient transport failures do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::ConnectionError { .. } | ProvisionError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = ProvisionError::SubscriptionError {
            topic: "$aws/certificates/create/json/accepted".into(),
            reason: "broker refused".into(),
        };
        assert_eq!(err.category(), "transport");

        let err = ProvisionError::Timeout {
            expected: "CreateKeysAndCertificate".into(),
            attempts: 10,
        };
        assert_eq!(err.category(), "protocol");

        let err = ProvisionError::PersistenceError("disk full".into());
        assert_eq!(err.category(), "storage");
    }

    #[test]
    fn test_is_retryable() {
        let err = ProvisionError::ConnectionError {
            endpoint: "abc123-ats.iot.us-east-1.amazonaws.com".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_retryable());

        let err = ProvisionError::ServiceRejected {
            operation: "RegisterThing".into(),
            error_code: "InvalidRequest".into(),
            error_message: "unknown template".into(),
            status_code: 400,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejection_display() {
        let err = ProvisionError::ServiceRejected {
            operation: "CreateKeysAndCertificate".into(),
            error_code: "Throttled".into(),
            error_message: "rate exceeded".into(),
            status_code: 429,
        };
        assert_eq!(
            err.to_string(),
            "CreateKeysAndCertificate request rejected with code:'Throttled' \
             message:'rate exceeded' statusCode:'429'"
        );
    }

    #[test]
    fn test_timeout_display_names_expected_response() {
        let err = ProvisionError::Timeout {
            expected: "CreateKeysAndCertificate".into(),
            attempts: 10,
        };
        assert_eq!(
            err.to_string(),
            "Timed out waiting for CreateKeysAndCertificate response after 10 polls"
        );
    }
}
