//! Registration payload aggregator.

use secrecy::ExposeSecret;

use super::model::{PayloadUpdate, RegistrationPayload, Role, RoleFields};
use crate::error::FlowError;
use crate::services::CompleteRegistrationRequest;

/// Which keys an update actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    pub email: bool,
    pub phone: bool,
    pub otp_method: bool,
    pub otp: bool,
}

/// Owns the accumulating [`RegistrationPayload`].
#[derive(Debug, Clone)]
pub struct PayloadAggregator {
    payload: RegistrationPayload,
}

impl PayloadAggregator {
    pub fn new(role: Role) -> Self {
        Self {
            payload: RegistrationPayload::new(role),
        }
    }

    pub fn payload(&self) -> &RegistrationPayload {
        &self.payload
    }

    /// Shallow-merge `update` into the payload.
    pub fn update(&mut self, update: PayloadUpdate) -> Changes {
        let p = &mut self.payload;
        let mut changes = Changes::default();

        if let Some(v) = update.account_type {
            p.account_type = Some(v);
        }
        if let Some(v) = update.first_name {
            p.first_name = v;
        }
        if let Some(v) = update.last_name {
            p.last_name = v;
        }
        if let Some(v) = update.organization_name {
            p.organization_name = v;
        }
        if let Some(v) = update.profile {
            p.profile = Some(v);
        }
        if let Some(v) = update.email {
            changes.email = p.email != v;
            p.email = v;
        }
        if let Some(v) = update.phone {
            changes.phone = p.phone != v;
            p.phone = v;
        }
        if let Some(v) = update.otp_method {
            changes.otp_method = p.otp_method != Some(v);
            p.otp_method = Some(v);
        }
        if let Some(v) = update.otp {
            changes.otp = p.otp != v;
            p.otp = v;
        }
        if let Some(v) = update.password {
            p.password = v;
        }
        if let Some(v) = update.confirm_password {
            p.confirm_password = v;
        }
        if let Some(v) = update.agree_to_terms {
            p.agree_to_terms = v;
        }
        changes
    }

    /// Build the account creation request from the accumulated payload.
    pub fn snapshot(&self) -> Result<CompleteRegistrationRequest, FlowError> {
        let p = &self.payload;
        let account_type = p.account_type.ok_or(FlowError::MissingField {
            field: "accountType",
            operation: "registration",
        })?;
        let otp_method = p.otp_method.ok_or(FlowError::MissingField {
            field: "otpMethod",
            operation: "registration",
        })?;

        Ok(CompleteRegistrationRequest {
            role: p.role,
            account_type,
            first_name: non_empty(&p.first_name),
            last_name: non_empty(&p.last_name),
            organization_name: non_empty(&p.organization_name),
            email: p.email.clone(),
            phone: p.phone.clone(),
            otp_method,
            password: p.password.expose_secret().to_string(),
            agree_to_terms: p.agree_to_terms,
            role_fields: p.profile.as_ref().map(RoleFields::from).unwrap_or_default(),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{AccountType, OtpMethod, RoleProfile};

    #[test]
    fn last_write_wins_per_key() {
        let mut agg = PayloadAggregator::new(Role::Tradesperson);
        agg.update(PayloadUpdate {
            account_type: Some(AccountType::Individual),
            first_name: Some("Ada".into()),
            last_name: Some("Byron".into()),
            ..Default::default()
        });
        agg.update(PayloadUpdate::email("first@x.com"));
        agg.update(PayloadUpdate {
            last_name: Some("Lovelace".into()),
            email: Some("second@x.com".into()),
            ..Default::default()
        });
        agg.update(PayloadUpdate::phone("712345678"));
        agg.update(PayloadUpdate::otp_method(OtpMethod::Phone));
        agg.update(PayloadUpdate::credentials("Abc12345", "Abc12345", true));

        let req = agg.snapshot().unwrap();
        assert_eq!(req.first_name.as_deref(), Some("Ada"));
        assert_eq!(req.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(req.email, "second@x.com");
        assert_eq!(req.phone, "712345678");
        assert_eq!(req.otp_method, OtpMethod::Phone);
        assert_eq!(req.password, "Abc12345");
        assert!(req.agree_to_terms);
    }

    #[test]
    fn profile_is_replaced_not_merged() {
        let mut agg = PayloadAggregator::new(Role::Contractor);
        agg.update(PayloadUpdate {
            profile: Some(RoleProfile::Contractor {
                categories: vec!["roofing".into(), "plumbing".into()],
            }),
            ..Default::default()
        });
        agg.update(PayloadUpdate {
            profile: Some(RoleProfile::Contractor {
                categories: vec!["electrical".into()],
            }),
            ..Default::default()
        });
        assert_eq!(
            agg.payload().profile,
            Some(RoleProfile::Contractor {
                categories: vec!["electrical".into()]
            })
        );
    }

    #[test]
    fn update_reports_changed_keys() {
        let mut agg = PayloadAggregator::new(Role::Customer);
        let changes = agg.update(PayloadUpdate::email("a@b.co"));
        assert!(changes.email);
        assert!(!changes.otp);

        let changes = agg.update(PayloadUpdate::email("a@b.co"));
        assert!(!changes.email, "same value is not a change");

        let changes = agg.update(PayloadUpdate::otp_method(OtpMethod::Email));
        assert!(changes.otp_method);
        let changes = agg.update(PayloadUpdate::otp_method(OtpMethod::Email));
        assert!(!changes.otp_method);
    }

    #[test]
    fn snapshot_requires_account_type_and_method() {
        let agg = PayloadAggregator::new(Role::Customer);
        let err = agg.snapshot().unwrap_err();
        assert!(matches!(err, FlowError::MissingField { field: "accountType", .. }));
    }

    #[test]
    fn snapshot_omits_blank_names() {
        let mut agg = PayloadAggregator::new(Role::Customer);
        agg.update(PayloadUpdate {
            account_type: Some(AccountType::Organization),
            organization_name: Some("  Acme  ".into()),
            otp_method: Some(OtpMethod::Email),
            ..Default::default()
        });
        let req = agg.snapshot().unwrap();
        assert_eq!(req.organization_name.as_deref(), Some("Acme"));
        assert!(req.first_name.is_none());
        assert_eq!(req.role_fields, RoleFields::default());
    }
}
