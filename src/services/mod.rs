//! Registration backend collaborators.
//!
//! The flow reaches the backend only through [`RegistrationService`]. The
//! wire format is owned by the backend; [`HttpRegistrationService`] speaks
//! the JSON dialect used by the marketplace API.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpRegistrationService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::onboarding::model::{AccountType, OtpMethod, Role, RoleFields};

/// Request that issues (or re-issues) an OTP for a pending registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRegistrationRequest {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,
    pub email: String,
    pub phone: String,
    pub otp_method: OtpMethod,
}

/// Request that checks a submitted code against the contact it was sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub otp: String,
}

impl VerifyOtpRequest {
    pub fn new(method: OtpMethod, contact: impl Into<String>, otp: impl Into<String>) -> Self {
        let contact = contact.into();
        let (email, phone) = match method {
            OtpMethod::Email => (Some(contact), None),
            OtpMethod::Phone => (None, Some(contact)),
        };
        Self {
            email,
            phone,
            otp: otp.into(),
        }
    }
}

/// Final account creation request.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRegistrationRequest {
    pub role: Role,
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    pub email: String,
    pub phone: String,
    pub otp_method: OtpMethod,
    pub password: String,
    pub agree_to_terms: bool,
    #[serde(flatten)]
    pub role_fields: RoleFields,
}

impl std::fmt::Debug for CompleteRegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompleteRegistrationRequest")
            .field("role", &self.role)
            .field("account_type", &self.account_type)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password", &"[REDACTED]")
            .field("role_fields", &self.role_fields)
            .finish_non_exhaustive()
    }
}

/// Positive acknowledgement from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAck {
    #[serde(default)]
    pub message: String,
}

/// Successful account creation. Handed off to profile completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationComplete {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: serde_json::Value,
    pub token: String,
}

/// Backend operations the onboarding flow depends on.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    /// Start a registration and issue the first OTP.
    async fn initiate_registration(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, ServiceError>;

    /// Re-issue an OTP for the same contact and method.
    async fn resend_otp(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, ServiceError>;

    /// Check a submitted code.
    async fn verify_otp(&self, request: &VerifyOtpRequest) -> Result<ServiceAck, ServiceError>;

    /// Returns `true` if the email is already registered.
    async fn email_exists(&self, email: &str) -> Result<bool, ServiceError>;

    /// Create the account.
    async fn complete_registration(
        &self,
        request: &CompleteRegistrationRequest,
    ) -> Result<RegistrationComplete, ServiceError>;
}
