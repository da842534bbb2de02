//! Error types for the onboarding flow.

use crate::onboarding::rules::FieldErrors;
use crate::onboarding::state::OnboardingStep;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failures reported by (or while talking to) a registration collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The backend answered but refused the request.
    #[error("{message}")]
    Rejected { message: String },

    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl ServiceError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Message suitable for a user-facing notification.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Rejected { message } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// Refusals raised by the step sequencer and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Step {step} has invalid fields: {errors}")]
    ValidationFailed {
        step: OnboardingStep,
        errors: FieldErrors,
    },

    #[error("Cannot {action} from step {step}")]
    InvalidTransition {
        step: OnboardingStep,
        action: &'static str,
    },

    #[error("Resend available in {remaining_seconds}s")]
    ResendUnavailable { remaining_seconds: u32 },

    #[error("A {operation} request is already in flight")]
    AlreadyInFlight { operation: &'static str },

    #[error("Contact has not been verified")]
    NotVerified,

    #[error("Verification code must be exactly 6 digits")]
    IncompleteCode,

    #[error("{operation} result was superseded by a newer request")]
    Superseded { operation: &'static str },

    #[error("Missing {field} for {operation}")]
    MissingField {
        field: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
