//! Scripted in-memory registration backend for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CompleteRegistrationRequest, InitiateRegistrationRequest, RegistrationComplete,
    RegistrationService, ServiceAck, VerifyOtpRequest,
};
use crate::error::ServiceError;

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initiate(String),
    Resend(String),
    Verify(String),
    EmailExists(String),
    Complete(String),
}

/// Fake backend with programmable outcomes.
///
/// Outcomes queued with the `push_*` methods are consumed first; otherwise
/// the defaults apply (issue succeeds, `123456` verifies, emails in
/// `registered` are taken, completion succeeds).
pub struct ScriptedService {
    calls: Mutex<Vec<Call>>,
    registered: Mutex<HashSet<String>>,
    issue_outcomes: Mutex<VecDeque<Result<ServiceAck, ServiceError>>>,
    verify_outcomes: Mutex<VecDeque<Result<ServiceAck, ServiceError>>>,
    complete_outcomes: Mutex<VecDeque<Result<RegistrationComplete, ServiceError>>>,
    email_outcomes: Mutex<VecDeque<Result<bool, ServiceError>>>,
    valid_code: String,
    latency: Duration,
    email_latency: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            registered: Mutex::new(HashSet::new()),
            issue_outcomes: Mutex::new(VecDeque::new()),
            verify_outcomes: Mutex::new(VecDeque::new()),
            complete_outcomes: Mutex::new(VecDeque::new()),
            email_outcomes: Mutex::new(VecDeque::new()),
            valid_code: "123456".to_string(),
            latency: Duration::from_millis(10),
            email_latency: Mutex::new(Vec::new()),
        }
    }

    pub fn with_registered(self, email: &str) -> Self {
        self.registered.lock().unwrap().insert(email.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Override latency for one email's availability probe.
    pub fn with_email_latency(self, email: &str, latency: Duration) -> Self {
        self.email_latency
            .lock()
            .unwrap()
            .push((email.to_string(), latency));
        self
    }

    pub fn push_issue(&self, outcome: Result<ServiceAck, ServiceError>) {
        self.issue_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_verify(&self, outcome: Result<ServiceAck, ServiceError>) {
        self.verify_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_complete(&self, outcome: Result<RegistrationComplete, ServiceError>) {
        self.complete_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_email_exists(&self, outcome: Result<bool, ServiceError>) {
        self.email_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_issue(&self) -> Result<ServiceAck, ServiceError> {
        self.issue_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ServiceAck {
                    message: "OTP sent".into(),
                })
            })
    }
}

#[async_trait]
impl RegistrationService for ScriptedService {
    async fn initiate_registration(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, ServiceError> {
        self.record(Call::Initiate(request.email.clone()));
        tokio::time::sleep(self.latency).await;
        self.next_issue()
    }

    async fn resend_otp(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, ServiceError> {
        self.record(Call::Resend(request.email.clone()));
        tokio::time::sleep(self.latency).await;
        self.next_issue()
    }

    async fn verify_otp(&self, request: &VerifyOtpRequest) -> Result<ServiceAck, ServiceError> {
        self.record(Call::Verify(request.otp.clone()));
        tokio::time::sleep(self.latency).await;
        if let Some(outcome) = self.verify_outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        if request.otp == self.valid_code {
            Ok(ServiceAck {
                message: "Verified".into(),
            })
        } else {
            Err(ServiceError::rejected("Invalid or expired OTP"))
        }
    }

    async fn email_exists(&self, email: &str) -> Result<bool, ServiceError> {
        self.record(Call::EmailExists(email.to_string()));
        let latency = self
            .email_latency
            .lock()
            .unwrap()
            .iter()
            .find(|(e, _)| e == email)
            .map(|(_, d)| *d)
            .unwrap_or(self.latency);
        tokio::time::sleep(latency).await;
        if let Some(outcome) = self.email_outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(self.registered.lock().unwrap().contains(email))
    }

    async fn complete_registration(
        &self,
        request: &CompleteRegistrationRequest,
    ) -> Result<RegistrationComplete, ServiceError> {
        self.record(Call::Complete(request.email.clone()));
        tokio::time::sleep(self.latency).await;
        if let Some(outcome) = self.complete_outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(RegistrationComplete {
            message: "Registration successful".into(),
            user: serde_json::json!({ "email": request.email, "role": request.role }),
            token: "token-abc".into(),
        })
    }
}
