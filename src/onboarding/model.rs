//! Registration payload and role data models.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Marketplace actor being onboarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Tradesperson,
    Professional,
    Contractor,
    HardwareSupplier,
}

impl Role {
    /// Service providers share one parameterized flow.
    pub fn is_provider(&self) -> bool {
        !matches!(self, Self::Customer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Customer => "customer",
            Self::Tradesperson => "tradesperson",
            Self::Professional => "professional",
            Self::Contractor => "contractor",
            Self::HardwareSupplier => "hardware_supplier",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Individual,
    Organization,
}

/// Channel the one-time passcode is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OtpMethod {
    Email,
    Phone,
}

impl std::fmt::Display for OtpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Phone => write!(f, "phone"),
        }
    }
}

/// Role-specific identity data.
///
/// Always replaced as a whole; the aggregator never merges into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProfile {
    Customer,
    Tradesperson { skill: String },
    Professional { profession: String },
    Contractor { categories: Vec<String> },
    HardwareSupplier { categories: Vec<String> },
}

impl RoleProfile {
    pub fn role(&self) -> Role {
        match self {
            Self::Customer => Role::Customer,
            Self::Tradesperson { .. } => Role::Tradesperson,
            Self::Professional { .. } => Role::Professional,
            Self::Contractor { .. } => Role::Contractor,
            Self::HardwareSupplier { .. } => Role::HardwareSupplier,
        }
    }
}

/// Flat role fields as they appear on outbound requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_categories: Option<Vec<String>>,
}

impl From<&RoleProfile> for RoleFields {
    fn from(profile: &RoleProfile) -> Self {
        match profile {
            RoleProfile::Customer => Self::default(),
            RoleProfile::Tradesperson { skill } => Self {
                skill: Some(skill.clone()),
                ..Default::default()
            },
            RoleProfile::Professional { profession } => Self {
                profession: Some(profession.clone()),
                ..Default::default()
            },
            RoleProfile::Contractor { categories } => Self {
                contractor_categories: Some(categories.clone()),
                ..Default::default()
            },
            RoleProfile::HardwareSupplier { categories } => Self {
                hardware_categories: Some(categories.clone()),
                ..Default::default()
            },
        }
    }
}

/// Registration record accumulated across the flow's steps.
#[derive(Debug, Clone)]
pub struct RegistrationPayload {
    pub role: Role,
    pub account_type: Option<AccountType>,
    pub first_name: String,
    pub last_name: String,
    pub organization_name: String,
    pub profile: Option<RoleProfile>,
    pub email: String,
    pub phone: String,
    pub otp_method: Option<OtpMethod>,
    /// 0-6 ASCII digits.
    pub otp: String,
    pub password: SecretString,
    pub confirm_password: SecretString,
    pub agree_to_terms: bool,
}

impl RegistrationPayload {
    /// Empty payload for a freshly started flow.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            account_type: None,
            first_name: String::new(),
            last_name: String::new(),
            organization_name: String::new(),
            profile: (role == Role::Customer).then_some(RoleProfile::Customer),
            email: String::new(),
            phone: String::new(),
            otp_method: None,
            otp: String::new(),
            password: SecretString::from(String::new()),
            confirm_password: SecretString::from(String::new()),
            agree_to_terms: false,
        }
    }

    /// Contact value the OTP is delivered to, if a method has been chosen.
    pub fn otp_contact(&self) -> Option<&str> {
        match self.otp_method? {
            OtpMethod::Email => Some(self.email.as_str()),
            OtpMethod::Phone => Some(self.phone.as_str()),
        }
    }
}

/// Partial update applied with shallow-merge semantics.
///
/// `None` leaves a field untouched. `profile` replaces the whole sub-object.
#[derive(Debug, Clone, Default)]
pub struct PayloadUpdate {
    pub account_type: Option<AccountType>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
    pub profile: Option<RoleProfile>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub otp_method: Option<OtpMethod>,
    pub otp: Option<String>,
    pub password: Option<SecretString>,
    pub confirm_password: Option<SecretString>,
    pub agree_to_terms: Option<bool>,
}

impl PayloadUpdate {
    pub fn email(value: impl Into<String>) -> Self {
        Self {
            email: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn phone(value: impl Into<String>) -> Self {
        Self {
            phone: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn otp(value: impl Into<String>) -> Self {
        Self {
            otp: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn otp_method(method: OtpMethod) -> Self {
        Self {
            otp_method: Some(method),
            ..Default::default()
        }
    }

    pub fn credentials(password: &str, confirm_password: &str, agree_to_terms: bool) -> Self {
        Self {
            password: Some(SecretString::from(password.to_string())),
            confirm_password: Some(SecretString::from(confirm_password.to_string())),
            agree_to_terms: Some(agree_to_terms),
            ..Default::default()
        }
    }
}
