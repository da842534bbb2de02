//! Onboarding system — guided multi-step registration.
//!
//! A new marketplace actor moves through six steps: identity, email, phone,
//! OTP delivery method, OTP verification, and credentials. The
//! `RegistrationFlow` sequencer gates each forward step on the validation
//! rules, issues and verifies the OTP challenge, and runs a debounced email
//! uniqueness check alongside the email step.

pub mod aggregator;
pub mod manager;
pub mod model;
pub mod notify;
pub mod otp;
pub mod rules;
pub mod state;
pub mod uniqueness;

pub use aggregator::PayloadAggregator;
pub use manager::{FlowStatus, RegistrationFlow, StepCheck};
pub use model::{AccountType, OtpMethod, PayloadUpdate, RegistrationPayload, Role, RoleProfile};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use otp::{OtpChallenge, OtpChallengeManager, VerifyOutcome};
pub use rules::{Field, FieldErrors};
pub use state::{OnboardingStep, StepState};
pub use uniqueness::{UniquenessChecker, UniquenessStatus};
