//! RegistrationFlow — the step sequencer.
//!
//! Owns the current step and the payload, gates every forward transition on
//! the validation rules, and drives the OTP challenge and uniqueness checker
//! at the steps where they apply.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator::PayloadAggregator;
use super::model::{OtpMethod, PayloadUpdate, RegistrationPayload, Role};
use super::notify::{Notification, Notifier};
use super::otp::{OtpChallenge, OtpChallengeManager, VerifyOutcome};
use super::rules::{
    self, EMAIL_TAKEN_MESSAGE, Field, FieldErrors, accept_phone_input, sanitize_otp_input,
};
use super::state::{OnboardingStep, StepState};
use super::uniqueness::{UniquenessChecker, UniquenessStatus};
use crate::config::OnboardingConfig;
use crate::error::FlowError;
use crate::services::{
    HttpRegistrationService, InitiateRegistrationRequest, RegistrationComplete,
    RegistrationService, ServiceAck,
};

/// Outcome of asking whether a step may be left forwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepCheck {
    pub ok: bool,
    pub errors: FieldErrors,
}

impl StepCheck {
    fn from_errors(errors: FieldErrors) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

/// Read-only view of the flow for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStatus {
    pub flow_id: Uuid,
    pub role: Role,
    pub step: OnboardingStep,
    pub step_number: u8,
    pub errors: FieldErrors,
    pub is_submitting: bool,
    pub email_status: UniquenessStatus,
    pub otp: OtpChallenge,
}

/// A single registration attempt, from role selection to account creation.
pub struct RegistrationFlow {
    id: Uuid,
    config: OnboardingConfig,
    service: Arc<dyn RegistrationService>,
    payload: RwLock<PayloadAggregator>,
    state: RwLock<StepState>,
    otp: OtpChallengeManager,
    uniqueness: UniquenessChecker,
    notifier: Notifier,
}

impl RegistrationFlow {
    pub fn new(role: Role, service: Arc<dyn RegistrationService>, config: OnboardingConfig) -> Self {
        let id = Uuid::new_v4();
        let notifier = Notifier::new();
        let otp = OtpChallengeManager::new(
            Arc::clone(&service),
            notifier.clone(),
            config.otp_window_secs(),
            config.countdown_tick,
        );
        let uniqueness =
            UniquenessChecker::new(Arc::clone(&service), notifier.clone(), config.email_debounce);
        info!(flow_id = %id, role = %role, provider = role.is_provider(), "Registration flow started");
        Self {
            id,
            config,
            service,
            payload: RwLock::new(PayloadAggregator::new(role)),
            state: RwLock::new(StepState::default()),
            otp,
            uniqueness,
            notifier,
        }
    }

    /// Validate `config` and wire a flow to the HTTP backend it names.
    pub fn connect(role: Role, config: OnboardingConfig) -> crate::error::Result<Self> {
        config.validate()?;
        let service = Arc::new(HttpRegistrationService::new(&config)?);
        Ok(Self::new(role, service, config))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn current_step(&self) -> OnboardingStep {
        self.state.read().await.step
    }

    /// Errors from the most recent failed forward transition.
    pub async fn errors(&self) -> FieldErrors {
        self.state.read().await.errors.clone()
    }

    pub async fn payload(&self) -> RegistrationPayload {
        self.payload.read().await.payload().clone()
    }

    pub async fn otp_challenge(&self) -> OtpChallenge {
        self.otp.snapshot().await
    }

    pub fn email_status(&self) -> UniquenessStatus {
        self.uniqueness.status()
    }

    pub fn subscribe_email_status(&self) -> watch::Receiver<UniquenessStatus> {
        self.uniqueness.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub async fn status(&self) -> FlowStatus {
        let (step, errors, is_submitting) = {
            let state = self.state.read().await;
            (state.step, state.errors.clone(), state.is_submitting)
        };
        let role = self.payload.read().await.payload().role;
        FlowStatus {
            flow_id: self.id,
            role,
            step,
            step_number: step.number(),
            errors,
            is_submitting,
            email_status: self.uniqueness.status(),
            otp: self.otp.snapshot().await,
        }
    }

    // ── Input ───────────────────────────────────────────────────────

    /// Merge a partial update and react to the keys that changed.
    ///
    /// Email edits re-arm the uniqueness check. A new delivery method, or an
    /// edit to the contact the code was sent to, tears down the OTP challenge.
    /// Code edits go through the auto-verify rule.
    pub async fn update(&self, update: PayloadUpdate) -> Option<Result<OnboardingStep, FlowError>> {
        // The payload lock is held while the checker and the challenge react,
        // so they observe edits in the same order as the payload.
        let (changes, otp) = {
            let mut payload = self.payload.write().await;
            let changes = payload.update(update);
            let p = payload.payload();

            if changes.email {
                self.uniqueness.on_email_changed(&p.email).await;
            }
            let contact_changed = match p.otp_method {
                Some(OtpMethod::Email) => changes.email,
                Some(OtpMethod::Phone) => changes.phone,
                None => false,
            };
            if changes.otp_method {
                debug!(flow_id = %self.id, "Delivery method changed, resetting OTP challenge");
                self.otp.reset().await;
            } else if contact_changed {
                debug!(flow_id = %self.id, "OTP contact edited, resetting OTP challenge");
                self.otp.reset().await;
            }
            (changes, p.otp.clone())
        };

        if changes.otp {
            return self.after_code_edit(&otp).await;
        }
        None
    }

    pub async fn input_email(&self, raw: &str) {
        self.update(PayloadUpdate::email(raw.trim())).await;
    }

    /// Keystroke-filtered phone input. Returns `false` and leaves the field
    /// unchanged when the value can never become a valid number.
    pub async fn input_phone(&self, raw: &str) -> bool {
        if !accept_phone_input(raw) {
            debug!(flow_id = %self.id, "Rejected phone input");
            return false;
        }
        self.update(PayloadUpdate::phone(raw)).await;
        true
    }

    pub async fn select_otp_method(&self, method: OtpMethod) {
        self.update(PayloadUpdate::otp_method(method)).await;
    }

    /// Code field input. Non-digits are stripped and the value is capped at
    /// six digits. Returns the verify outcome when a verify call fired.
    pub async fn input_otp(&self, raw: &str) -> Option<Result<OnboardingStep, FlowError>> {
        self.update(PayloadUpdate::otp(sanitize_otp_input(raw))).await
    }

    /// Re-run the auto-verify rule against the unchanged code.
    pub async fn refresh_otp(&self) -> Option<Result<OnboardingStep, FlowError>> {
        let otp = self.payload.read().await.payload().otp.clone();
        self.after_code_edit(&otp).await
    }

    async fn after_code_edit(&self, code: &str) -> Option<Result<OnboardingStep, FlowError>> {
        let mut code = code.to_string();
        loop {
            let target = {
                let payload = self.payload.read().await;
                let p = payload.payload();
                p.otp_method.zip(p.otp_contact().map(str::to_string))
            };
            let at_verification = self.current_step().await == OnboardingStep::Verification;
            let auto_verify = at_verification && target.is_some();

            let ticket = self.otp.observe_code(&code, auto_verify).await?;
            let (method, contact) = target?;

            match self.otp.redeem(ticket, method, &contact).await {
                Ok(VerifyOutcome::Verified(_)) => {
                    return Some(self.advance_after_verification().await);
                }
                Ok(VerifyOutcome::Superseded) => {
                    // The code changed underneath us; evaluate the latest value
                    code = self.payload.read().await.payload().otp.clone();
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn advance_after_verification(&self) -> Result<OnboardingStep, FlowError> {
        if self.current_step().await != OnboardingStep::Verification {
            return Err(FlowError::Superseded {
                operation: "OTP verify",
            });
        }
        self.advance().await
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Check whether `step` may be left forwards with the current payload.
    pub async fn check_step(&self, step: OnboardingStep) -> StepCheck {
        let mut errors = {
            let payload = self.payload.read().await;
            rules::validate_step(step, payload.payload(), self.config.min_password_len)
        };

        match step {
            OnboardingStep::Email => {
                if self.uniqueness.status().blocks_advance() {
                    errors.insert(Field::Email, EMAIL_TAKEN_MESSAGE);
                }
            }
            OnboardingStep::Verification => {
                if !self.otp.snapshot().await.verified {
                    errors.insert(Field::Otp, "Please verify the code we sent you");
                }
            }
            _ => {}
        }
        StepCheck::from_errors(errors)
    }

    /// Check the current step.
    pub async fn can_advance(&self) -> StepCheck {
        let step = self.current_step().await;
        self.check_step(step).await
    }

    /// Move forward one step if the current step validates.
    ///
    /// Leaving the delivery-method step also issues the OTP; a failed issue
    /// keeps the flow where it is. The credentials step is left only via
    /// [`submit`](Self::submit).
    pub async fn advance(&self) -> Result<OnboardingStep, FlowError> {
        let step = self.current_step().await;
        if step.is_terminal() || step == OnboardingStep::Credentials {
            return Err(FlowError::InvalidTransition {
                step,
                action: "advance",
            });
        }

        let check = self.check_step(step).await;
        if !check.ok {
            debug!(flow_id = %self.id, step = %step, errors = %check.errors, "Step validation failed");
            self.state.write().await.errors = check.errors.clone();
            return Err(FlowError::ValidationFailed {
                step,
                errors: check.errors,
            });
        }
        self.state.write().await.errors.clear();

        if step == OnboardingStep::DeliveryMethod {
            let request = self.issue_request().await?;
            self.otp.issue(&request).await?;
            self.payload.write().await.update(PayloadUpdate::otp(String::new()));
        }

        let mut state = self.state.write().await;
        if state.step != step {
            // Someone else moved the flow while the issue call was outstanding
            return Err(FlowError::Superseded {
                operation: "advance",
            });
        }
        let next = state
            .advance()
            .map_err(|_| FlowError::InvalidTransition {
                step,
                action: "advance",
            })?;
        info!(flow_id = %self.id, from = %step, to = %next, "Step advanced");
        Ok(next)
    }

    /// Step back. Never validated.
    pub async fn retreat(&self) -> Result<OnboardingStep, FlowError> {
        let mut state = self.state.write().await;
        let step = state.step;
        if state.is_submitting {
            return Err(FlowError::AlreadyInFlight {
                operation: "registration",
            });
        }
        let previous = state.retreat().map_err(|_| FlowError::InvalidTransition {
            step,
            action: "go back",
        })?;
        info!(flow_id = %self.id, from = %step, to = %previous, "Step retreated");
        Ok(previous)
    }

    /// Request a fresh code once the countdown has run out.
    pub async fn resend(&self) -> Result<ServiceAck, FlowError> {
        let step = self.current_step().await;
        if step != OnboardingStep::Verification {
            return Err(FlowError::InvalidTransition {
                step,
                action: "resend code",
            });
        }
        let request = self.issue_request().await?;
        let ack = self.otp.resend(&request).await?;
        self.payload.write().await.update(PayloadUpdate::otp(String::new()));
        Ok(ack)
    }

    /// Explicitly verify the code currently in the field.
    pub async fn verify(&self) -> Result<OnboardingStep, FlowError> {
        let step = self.current_step().await;
        if step != OnboardingStep::Verification {
            return Err(FlowError::InvalidTransition {
                step,
                action: "verify code",
            });
        }
        let (method, contact, code) = {
            let payload = self.payload.read().await;
            let p = payload.payload();
            let method = p.otp_method.ok_or(FlowError::MissingField {
                field: "otpMethod",
                operation: "OTP verify",
            })?;
            (method, p.otp_contact().unwrap_or_default().to_string(), p.otp.clone())
        };
        match self.otp.verify(method, &contact, &code).await? {
            VerifyOutcome::Verified(_) => self.advance_after_verification().await,
            VerifyOutcome::Superseded => Err(FlowError::Superseded {
                operation: "OTP verify",
            }),
        }
    }

    /// Create the account from the aggregated payload.
    ///
    /// On failure the payload is kept and the flow stays on the credentials
    /// step so the user can retry.
    pub async fn submit(&self) -> Result<RegistrationComplete, FlowError> {
        {
            let mut state = self.state.write().await;
            if state.step != OnboardingStep::Credentials {
                return Err(FlowError::InvalidTransition {
                    step: state.step,
                    action: "submit",
                });
            }
            if state.is_submitting {
                return Err(FlowError::AlreadyInFlight {
                    operation: "registration",
                });
            }
            state.is_submitting = true;
        }

        let result = self.try_submit().await;

        let mut state = self.state.write().await;
        state.is_submitting = false;
        match result {
            Ok(complete) => {
                state.step = OnboardingStep::Submitted;
                state.errors.clear();
                drop(state);
                info!(flow_id = %self.id, "Registration completed");
                self.notifier.success(if complete.message.trim().is_empty() {
                    "Registration successful".to_string()
                } else {
                    complete.message.clone()
                });
                Ok(complete)
            }
            Err(FlowError::ValidationFailed { step, errors }) => {
                state.errors = errors.clone();
                Err(FlowError::ValidationFailed { step, errors })
            }
            Err(e) => Err(e),
        }
    }

    async fn try_submit(&self) -> Result<RegistrationComplete, FlowError> {
        let check = self.check_step(OnboardingStep::Credentials).await;
        if !check.ok {
            return Err(FlowError::ValidationFailed {
                step: OnboardingStep::Credentials,
                errors: check.errors,
            });
        }
        if self.uniqueness.status().blocks_advance() {
            let mut errors = FieldErrors::new();
            errors.insert(Field::Email, EMAIL_TAKEN_MESSAGE);
            return Err(FlowError::ValidationFailed {
                step: OnboardingStep::Email,
                errors,
            });
        }
        if !self.otp.snapshot().await.verified {
            return Err(FlowError::NotVerified);
        }

        let request = self.payload.read().await.snapshot()?;
        match self.service.complete_registration(&request).await {
            Ok(complete) => Ok(complete),
            Err(e) => {
                warn!(flow_id = %self.id, error = %e, "Registration failed");
                self.notifier.error(e.user_message("Registration failed. Please try again."));
                Err(e.into())
            }
        }
    }

    async fn issue_request(&self) -> Result<InitiateRegistrationRequest, FlowError> {
        let payload = self.payload.read().await;
        let p = payload.payload();
        let otp_method = p.otp_method.ok_or(FlowError::MissingField {
            field: "otpMethod",
            operation: "OTP issue",
        })?;
        Ok(InitiateRegistrationRequest {
            role: p.role,
            account_type: p.account_type,
            email: p.email.clone(),
            phone: p.phone.clone(),
            otp_method,
        })
    }
}
