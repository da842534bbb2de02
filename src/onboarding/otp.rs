//! OTP challenge manager — issue, countdown, auto-verify, resend.
//!
//! The countdown is display state only. It gates the resend affordance;
//! actual code expiry is enforced by the backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::model::OtpMethod;
use super::notify::Notifier;
use super::rules::{OTP_LENGTH, is_complete_otp};
use crate::error::FlowError;
use crate::services::{InitiateRegistrationRequest, RegistrationService, ServiceAck, VerifyOtpRequest};

/// Observable state of the current challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OtpChallenge {
    pub delivery_method: Option<OtpMethod>,
    pub remaining_seconds: u32,
    /// True while `remaining_seconds > 0`.
    pub is_active: bool,
    pub verified: bool,
    /// Last code sent to the backend; suppresses duplicate auto-verify.
    pub last_submitted_code: Option<String>,
    pub issue_in_flight: bool,
    pub verify_in_flight: bool,
}

impl OtpChallenge {
    /// Resend is offered once the countdown has run out.
    pub fn can_resend(&self) -> bool {
        !self.is_active && !self.issue_in_flight
    }
}

/// Challenge plus the bookkeeping used to drop stale results.
#[derive(Debug, Default)]
struct ChallengeSlot {
    challenge: OtpChallenge,
    observed_code: String,
    /// Bumped on reset; issue results from an older epoch are dropped.
    issue_epoch: u64,
    /// Bumped on issue, reset and every code edit.
    verify_epoch: u64,
    /// Identifies the countdown task allowed to write.
    countdown_generation: u64,
}

/// Permission to send one verify request for one code.
#[derive(Debug)]
pub struct VerifyTicket {
    code: String,
    epoch: u64,
}

impl VerifyTicket {
    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Result of a verify call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified(ServiceAck),
    /// The code or challenge changed while the call was outstanding.
    Superseded,
}

/// Owns the OTP countdown timer and the verify/resend protocol.
pub struct OtpChallengeManager {
    service: Arc<dyn RegistrationService>,
    notifier: Notifier,
    window_secs: u32,
    tick: Duration,
    slot: Arc<RwLock<ChallengeSlot>>,
    countdown: Mutex<Option<JoinHandle<()>>>,
}

impl OtpChallengeManager {
    pub fn new(
        service: Arc<dyn RegistrationService>,
        notifier: Notifier,
        window_secs: u32,
        tick: Duration,
    ) -> Self {
        Self {
            service,
            notifier,
            window_secs,
            tick,
            slot: Arc::new(RwLock::new(ChallengeSlot::default())),
            countdown: Mutex::new(None),
        }
    }

    /// Current challenge state.
    pub async fn snapshot(&self) -> OtpChallenge {
        self.slot.read().await.challenge.clone()
    }

    /// Issue the first code for a registration.
    pub async fn issue(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, FlowError> {
        let epoch = self.claim_issue(false).await?;
        let result = self.service.initiate_registration(request).await;
        self.finish_issue(epoch, request.otp_method, result, "OTP issue")
            .await
    }

    /// Re-issue a code. Only allowed once the countdown has run out.
    pub async fn resend(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, FlowError> {
        let epoch = self.claim_issue(true).await?;
        let result = self.service.resend_otp(request).await;
        self.finish_issue(epoch, request.otp_method, result, "OTP resend")
            .await
    }

    async fn claim_issue(&self, resend: bool) -> Result<u64, FlowError> {
        let mut slot = self.slot.write().await;
        if slot.challenge.issue_in_flight {
            return Err(FlowError::AlreadyInFlight {
                operation: "OTP issue",
            });
        }
        if resend && slot.challenge.is_active {
            return Err(FlowError::ResendUnavailable {
                remaining_seconds: slot.challenge.remaining_seconds,
            });
        }
        slot.challenge.issue_in_flight = true;
        Ok(slot.issue_epoch)
    }

    async fn finish_issue(
        &self,
        epoch: u64,
        method: OtpMethod,
        result: Result<ServiceAck, crate::error::ServiceError>,
        operation: &'static str,
    ) -> Result<ServiceAck, FlowError> {
        let mut slot = self.slot.write().await;
        slot.challenge.issue_in_flight = false;

        if slot.issue_epoch != epoch {
            debug!(operation, "Discarding superseded OTP issue result");
            return Err(FlowError::Superseded { operation });
        }

        match result {
            Ok(ack) => {
                slot.challenge.delivery_method = Some(method);
                slot.challenge.remaining_seconds = self.window_secs;
                slot.challenge.is_active = true;
                slot.challenge.verified = false;
                slot.challenge.last_submitted_code = None;
                slot.observed_code.clear();
                slot.verify_epoch += 1;
                slot.countdown_generation += 1;
                let generation = slot.countdown_generation;
                drop(slot);

                self.spawn_countdown(generation);
                info!(method = %method, window_secs = self.window_secs, "{operation} succeeded");
                if ack.message.trim().is_empty() {
                    self.notifier
                        .info(format!("Verification code sent to your {method}"));
                } else {
                    self.notifier.info(ack.message.clone());
                }
                Ok(ack)
            }
            Err(e) => {
                warn!(method = %method, error = %e, "{operation} failed");
                self.notifier
                    .error(e.user_message("Failed to send verification code"));
                Err(e.into())
            }
        }
    }

    /// Record the code field's current value.
    ///
    /// Any edit clears a previous verification. Dropping below six digits
    /// re-arms auto-verify. When `auto_verify` is set and the code is
    /// eligible, returns a ticket for exactly one verify call.
    pub async fn observe_code(&self, code: &str, auto_verify: bool) -> Option<VerifyTicket> {
        let mut slot = self.slot.write().await;

        if slot.observed_code != code {
            slot.observed_code = code.to_string();
            slot.verify_epoch += 1;
            if slot.challenge.verified {
                debug!("Code edited after verification, clearing verified flag");
                slot.challenge.verified = false;
            }
        }

        if code.len() < OTP_LENGTH {
            slot.challenge.last_submitted_code = None;
            return None;
        }
        if !auto_verify || !is_complete_otp(code) {
            return None;
        }

        let c = &slot.challenge;
        if c.verified
            || c.verify_in_flight
            || c.last_submitted_code.as_deref() == Some(code)
        {
            return None;
        }
        Some(Self::claim_verify(&mut slot, code))
    }

    fn claim_verify(slot: &mut ChallengeSlot, code: &str) -> VerifyTicket {
        slot.challenge.last_submitted_code = Some(code.to_string());
        slot.challenge.verify_in_flight = true;
        VerifyTicket {
            code: code.to_string(),
            epoch: slot.verify_epoch,
        }
    }

    /// Explicitly verify a code, bypassing the duplicate-code guard.
    pub async fn verify(
        &self,
        method: OtpMethod,
        contact: &str,
        code: &str,
    ) -> Result<VerifyOutcome, FlowError> {
        if !is_complete_otp(code) {
            return Err(FlowError::IncompleteCode);
        }
        let ticket = {
            let mut slot = self.slot.write().await;
            if slot.challenge.verify_in_flight {
                return Err(FlowError::AlreadyInFlight {
                    operation: "OTP verify",
                });
            }
            if slot.observed_code != code {
                slot.observed_code = code.to_string();
                slot.verify_epoch += 1;
            }
            Self::claim_verify(&mut slot, code)
        };
        self.redeem(ticket, method, contact).await
    }

    /// Send the verify request a ticket was issued for.
    pub async fn redeem(
        &self,
        ticket: VerifyTicket,
        method: OtpMethod,
        contact: &str,
    ) -> Result<VerifyOutcome, FlowError> {
        debug!(method = %method, code_len = ticket.code.len(), "Verifying OTP");
        let request = VerifyOtpRequest::new(method, contact, ticket.code.as_str());
        let result = self.service.verify_otp(&request).await;

        let mut slot = self.slot.write().await;
        slot.challenge.verify_in_flight = false;

        if slot.verify_epoch != ticket.epoch {
            debug!("Discarding superseded OTP verify result");
            return Ok(VerifyOutcome::Superseded);
        }

        match result {
            Ok(ack) => {
                slot.challenge.verified = true;
                drop(slot);
                info!(method = %method, "OTP verified");
                self.notifier.success("Verification successful");
                Ok(VerifyOutcome::Verified(ack))
            }
            Err(e) => {
                drop(slot);
                warn!(method = %method, error = %e, "OTP verification failed");
                self.notifier
                    .error(e.user_message("Invalid verification code"));
                Err(e.into())
            }
        }
    }

    /// Tear down the challenge. Used when the delivery method changes.
    pub async fn reset(&self) {
        self.replace_countdown(None);
        let mut slot = self.slot.write().await;
        // Outstanding calls still complete; their results are dropped by epoch.
        let issue_in_flight = slot.challenge.issue_in_flight;
        let verify_in_flight = slot.challenge.verify_in_flight;
        slot.challenge = OtpChallenge {
            issue_in_flight,
            verify_in_flight,
            ..Default::default()
        };
        slot.observed_code.clear();
        slot.issue_epoch += 1;
        slot.verify_epoch += 1;
        slot.countdown_generation += 1;
        debug!("OTP challenge reset");
    }

    fn spawn_countdown(&self, generation: u64) {
        let slot = Arc::clone(&self.slot);
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + tick;
            let mut interval = tokio::time::interval_at(start, tick);
            loop {
                interval.tick().await;
                let mut slot = slot.write().await;
                if slot.countdown_generation != generation {
                    break;
                }
                let challenge = &mut slot.challenge;
                challenge.remaining_seconds = challenge.remaining_seconds.saturating_sub(1);
                if challenge.remaining_seconds == 0 {
                    challenge.is_active = false;
                    debug!("OTP countdown finished, resend available");
                    break;
                }
            }
        });
        self.replace_countdown(Some(handle));
    }

    fn replace_countdown(&self, handle: Option<JoinHandle<()>>) {
        let mut guard = self.countdown.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = std::mem::replace(&mut *guard, handle) {
            old.abort();
        }
    }
}

impl Drop for OtpChallengeManager {
    fn drop(&mut self) {
        self.replace_countdown(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::onboarding::notify::NotificationLevel;
    use crate::services::mock::{Call, ScriptedService};

    fn request(method: OtpMethod) -> InitiateRegistrationRequest {
        InitiateRegistrationRequest {
            role: crate::onboarding::model::Role::Customer,
            account_type: None,
            email: "new@x.com".into(),
            phone: "712345678".into(),
            otp_method: method,
        }
    }

    fn manager(service: Arc<ScriptedService>) -> (Arc<OtpChallengeManager>, Notifier) {
        let notifier = Notifier::new();
        let mgr = OtpChallengeManager::new(service, notifier.clone(), 120, Duration::from_secs(1));
        (Arc::new(mgr), notifier)
    }

    fn verify_calls(service: &ScriptedService) -> usize {
        service.count(|c| matches!(c, Call::Verify(_)))
    }

    #[tokio::test(start_paused = true)]
    async fn issue_arms_countdown() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());

        mgr.issue(&request(OtpMethod::Email)).await.unwrap();
        let c = mgr.snapshot().await;
        assert_eq!(c.remaining_seconds, 120);
        assert!(c.is_active);
        assert!(!c.can_resend());
        assert_eq!(c.delivery_method, Some(OtpMethod::Email));

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        assert_eq!(mgr.snapshot().await.remaining_seconds, 60);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let c = mgr.snapshot().await;
        assert_eq!(c.remaining_seconds, 0);
        assert!(!c.is_active);
        assert!(c.can_resend());
    }

    #[tokio::test(start_paused = true)]
    async fn resend_refused_while_active() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Phone)).await.unwrap();

        let err = mgr.resend(&request(OtpMethod::Phone)).await.unwrap_err();
        assert!(matches!(err, FlowError::ResendUnavailable { remaining_seconds: 120 }));
        assert_eq!(service.count(|c| matches!(c, Call::Resend(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resend_rearms_full_window() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Email)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(!mgr.snapshot().await.is_active);

        mgr.resend(&request(OtpMethod::Email)).await.unwrap();
        let c = mgr.snapshot().await;
        assert_eq!(c.remaining_seconds, 120);
        assert!(c.is_active);
        assert_eq!(service.count(|c| matches!(c, Call::Resend(_))), 1);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(mgr.snapshot().await.remaining_seconds, 110);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_issue_leaves_challenge_inactive() {
        let service = Arc::new(ScriptedService::new());
        service.push_issue(Err(ServiceError::rejected("Phone number not reachable")));
        let (mgr, notifier) = manager(service.clone());
        let mut rx = notifier.subscribe();

        let err = mgr.issue(&request(OtpMethod::Phone)).await.unwrap_err();
        assert!(matches!(err, FlowError::Service(ServiceError::Rejected { .. })));
        let c = mgr.snapshot().await;
        assert!(!c.is_active);
        assert!(!c.issue_in_flight);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.level, NotificationLevel::Error);
        assert_eq!(n.message, "Phone number not reachable");
    }

    #[tokio::test(start_paused = true)]
    async fn auto_verify_fires_once_per_code() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Email)).await.unwrap();

        assert!(mgr.observe_code("12345", true).await.is_none());
        let ticket = mgr.observe_code("123456", true).await.expect("first complete code fires");
        // Re-render with the same value while the call is outstanding
        assert!(mgr.observe_code("123456", true).await.is_none());

        let outcome = mgr.redeem(ticket, OtpMethod::Email, "new@x.com").await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Verified(_)));
        assert!(mgr.snapshot().await.verified);

        // Re-render after success
        assert!(mgr.observe_code("123456", true).await.is_none());
        assert_eq!(verify_calls(&service), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_verify_keeps_timer_and_blocks_same_code() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Email)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let ticket = mgr.observe_code("000000", true).await.unwrap();
        let err = mgr.redeem(ticket, OtpMethod::Email, "new@x.com").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid or expired OTP");

        let c = mgr.snapshot().await;
        assert!(c.is_active);
        assert_eq!(c.remaining_seconds, 110);
        assert!(!c.verified);
        assert!(!c.verify_in_flight);

        // Same value again does not refire
        assert!(mgr.observe_code("000000", true).await.is_none());
        // Editing below six digits re-arms
        assert!(mgr.observe_code("00000", true).await.is_none());
        assert!(mgr.snapshot().await.last_submitted_code.is_none());
        assert!(mgr.observe_code("000000", true).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn editing_after_verification_clears_it() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Email)).await.unwrap();

        let ticket = mgr.observe_code("123456", true).await.unwrap();
        mgr.redeem(ticket, OtpMethod::Email, "new@x.com").await.unwrap();
        assert!(mgr.snapshot().await.verified);

        mgr.observe_code("12345", true).await;
        assert!(!mgr.snapshot().await.verified);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_during_verify_discards_result() {
        let service = Arc::new(ScriptedService::new().with_latency(Duration::from_millis(500)));
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Email)).await.unwrap();

        let ticket = mgr.observe_code("123456", true).await.unwrap();
        let pending = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.redeem(ticket, OtpMethod::Email, "new@x.com").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        mgr.observe_code("12345", true).await;

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, VerifyOutcome::Superseded);
        let c = mgr.snapshot().await;
        assert!(!c.verified);
        assert!(!c.verify_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_countdown_and_verification() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        mgr.issue(&request(OtpMethod::Email)).await.unwrap();
        let ticket = mgr.observe_code("123456", true).await.unwrap();
        mgr.redeem(ticket, OtpMethod::Email, "new@x.com").await.unwrap();

        mgr.reset().await;
        let c = mgr.snapshot().await;
        assert!(!c.verified);
        assert!(!c.is_active);
        assert_eq!(c.delivery_method, None);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mgr.snapshot().await.remaining_seconds, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_verify_rejects_incomplete_code() {
        let service = Arc::new(ScriptedService::new());
        let (mgr, _) = manager(service.clone());
        let err = mgr.verify(OtpMethod::Phone, "712345678", "12a").await.unwrap_err();
        assert!(matches!(err, FlowError::IncompleteCode));
        assert_eq!(verify_calls(&service), 0);

        let outcome = mgr.verify(OtpMethod::Phone, "712345678", "123456").await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Verified(_)));
    }
}
