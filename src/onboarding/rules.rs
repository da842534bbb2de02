//! Per-step validation rules and input filters.
//!
//! Every rule here is a pure function of the payload. The uniqueness veto
//! and the OTP verification gate are layered on top by the sequencer.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use secrecy::ExposeSecret;
use serde::Serialize;

use super::model::{AccountType, RegistrationPayload, Role, RoleProfile};
use super::state::OnboardingStep;

/// Number of digits in a one-time passcode.
pub const OTP_LENGTH: usize = 6;

/// Number of digits in a national phone number.
pub const PHONE_LENGTH: usize = 9;

pub const EMAIL_TAKEN_MESSAGE: &str = "This email is already registered";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[71]\d{8}$").expect("phone pattern compiles"));

/// Payload field an error is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    AccountType,
    FirstName,
    LastName,
    OrganizationName,
    Profile,
    Email,
    Phone,
    OtpMethod,
    Otp,
    Password,
    ConfirmPassword,
    AgreeToTerms,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AccountType => "accountType",
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::OrganizationName => "organizationName",
            Self::Profile => "profile",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::OtpMethod => "otpMethod",
            Self::Otp => "otp",
            Self::Password => "password",
            Self::ConfirmPassword => "confirmPassword",
            Self::AgreeToTerms => "agreeToTerms",
        };
        write!(f, "{s}")
    }
}

/// Field-keyed validation messages for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<Field, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error; the first message for a field wins.
    pub fn insert(&mut self, field: Field, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(f, m)| (*f, m.as_str()))
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Basic address shape check used for both validation and probe gating.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Complete national phone number: 9 digits, leading 7 or 1.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

/// Keystroke filter for the phone field.
///
/// Accepts partial input as long as it can still become a valid number.
pub fn accept_phone_input(input: &str) -> bool {
    input.len() <= PHONE_LENGTH
        && input.chars().all(|c| c.is_ascii_digit())
        && input.chars().next().is_none_or(|c| c == '7' || c == '1')
}

/// Strip non-digits and truncate to the OTP length.
pub fn sanitize_otp_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(OTP_LENGTH)
        .collect()
}

/// Exactly six ASCII digits.
pub fn is_complete_otp(code: &str) -> bool {
    code.len() == OTP_LENGTH && code.chars().all(|c| c.is_ascii_digit())
}

/// Validate the fields a step owns.
pub fn validate_step(
    step: OnboardingStep,
    payload: &RegistrationPayload,
    min_password_len: usize,
) -> FieldErrors {
    match step {
        OnboardingStep::Identity => validate_identity(payload),
        OnboardingStep::Email => validate_email(payload),
        OnboardingStep::Phone => validate_phone(payload),
        OnboardingStep::DeliveryMethod => validate_delivery_method(payload),
        OnboardingStep::Verification => validate_otp(payload),
        OnboardingStep::Credentials => validate_credentials(payload, min_password_len),
        OnboardingStep::Submitted => FieldErrors::new(),
    }
}

fn validate_identity(payload: &RegistrationPayload) -> FieldErrors {
    let mut errors = FieldErrors::new();

    match payload.account_type {
        None => errors.insert(Field::AccountType, "Please select an account type"),
        Some(AccountType::Individual) => {
            if payload.first_name.trim().is_empty() {
                errors.insert(Field::FirstName, "First name is required");
            }
            if payload.last_name.trim().is_empty() {
                errors.insert(Field::LastName, "Last name is required");
            }
        }
        Some(AccountType::Organization) => {
            if payload.organization_name.trim().is_empty() {
                errors.insert(Field::OrganizationName, "Organization name is required");
            }
        }
    }

    match &payload.profile {
        None => errors.insert(Field::Profile, profile_prompt(payload.role)),
        Some(profile) if profile.role() != payload.role => {
            errors.insert(Field::Profile, profile_prompt(payload.role));
        }
        Some(RoleProfile::Customer) => {}
        Some(RoleProfile::Tradesperson { skill }) => {
            if skill.trim().is_empty() {
                errors.insert(Field::Profile, profile_prompt(payload.role));
            }
        }
        Some(RoleProfile::Professional { profession }) => {
            if profession.trim().is_empty() {
                errors.insert(Field::Profile, profile_prompt(payload.role));
            }
        }
        Some(RoleProfile::Contractor { categories })
        | Some(RoleProfile::HardwareSupplier { categories }) => {
            if categories.iter().all(|c| c.trim().is_empty()) {
                errors.insert(Field::Profile, profile_prompt(payload.role));
            }
        }
    }

    errors
}

fn profile_prompt(role: Role) -> &'static str {
    match role {
        Role::Customer => "Customer details are required",
        Role::Tradesperson => "Please select your skill",
        Role::Professional => "Please select your profession",
        Role::Contractor => "Please select at least one contractor category",
        Role::HardwareSupplier => "Please select at least one hardware category",
    }
}

fn validate_email(payload: &RegistrationPayload) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if payload.email.is_empty() {
        errors.insert(Field::Email, "Email is required");
    } else if !is_valid_email(&payload.email) {
        errors.insert(Field::Email, "Please enter a valid email address");
    }
    errors
}

fn validate_phone(payload: &RegistrationPayload) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if payload.phone.is_empty() {
        errors.insert(Field::Phone, "Phone number is required");
    } else if !is_valid_phone(&payload.phone) {
        errors.insert(
            Field::Phone,
            "Phone number must be 9 digits starting with 7 or 1",
        );
    }
    errors
}

fn validate_delivery_method(payload: &RegistrationPayload) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if payload.otp_method.is_none() {
        errors.insert(Field::OtpMethod, "Please choose how to receive your code");
    }
    errors
}

fn validate_otp(payload: &RegistrationPayload) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if !is_complete_otp(&payload.otp) {
        errors.insert(Field::Otp, "Please enter the 6-digit code");
    }
    errors
}

fn validate_credentials(payload: &RegistrationPayload, min_password_len: usize) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let password = payload.password.expose_secret();
    let confirm = payload.confirm_password.expose_secret();

    if password.is_empty() {
        errors.insert(Field::Password, "Password is required");
    } else if password.chars().count() < min_password_len {
        errors.insert(
            Field::Password,
            format!("Password must be at least {min_password_len} characters"),
        );
    }

    if confirm.is_empty() {
        errors.insert(Field::ConfirmPassword, "Please confirm your password");
    } else if confirm != password {
        errors.insert(Field::ConfirmPassword, "Passwords do not match");
    }

    if !payload.agree_to_terms {
        errors.insert(Field::AgreeToTerms, "You must agree to the terms and conditions");
    }
    errors
}
