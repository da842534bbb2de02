//! Marketplace onboarding — registration state machine and OTP protocol.

pub mod config;
pub mod error;
pub mod onboarding;
pub mod services;
