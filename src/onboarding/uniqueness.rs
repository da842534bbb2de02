//! Debounced email uniqueness checker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::notify::Notifier;
use super::rules::is_valid_email;
use crate::services::RegistrationService;

/// Availability verdict for the email currently in the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessStatus {
    Idle,
    Checking,
    Available,
    Taken,
}

impl UniquenessStatus {
    /// Only a confirmed conflict blocks the email step.
    pub fn blocks_advance(&self) -> bool {
        matches!(self, Self::Taken)
    }
}

impl std::fmt::Display for UniquenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Available => "available",
            Self::Taken => "taken",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    email: String,
    /// Latest issued request token.
    token: u64,
}

/// Classifies the email field as idle/checking/available/taken.
///
/// Each edit gets a fresh token. Results carrying an older token are
/// dropped, so the last write wins.
pub struct UniquenessChecker {
    service: Arc<dyn RegistrationService>,
    notifier: Notifier,
    debounce: Duration,
    state: Arc<RwLock<ProbeState>>,
    status: Arc<watch::Sender<UniquenessStatus>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl UniquenessChecker {
    pub fn new(service: Arc<dyn RegistrationService>, notifier: Notifier, debounce: Duration) -> Self {
        let (status, _rx) = watch::channel(UniquenessStatus::Idle);
        Self {
            service,
            notifier,
            debounce,
            state: Arc::new(RwLock::new(ProbeState::default())),
            status: Arc::new(status),
            pending: Mutex::new(None),
        }
    }

    pub fn status(&self) -> UniquenessStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UniquenessStatus> {
        self.status.subscribe()
    }

    /// Feed a new email value. Re-arms the debounce timer.
    pub async fn on_email_changed(&self, email: &str) {
        let token = {
            let mut state = self.state.write().await;
            state.token += 1;
            state.email = email.to_string();
            state.token
        };
        self.replace_pending(None);

        // Any previous verdict belongs to a different address
        self.status.send_if_modified(|s| {
            let changed = *s != UniquenessStatus::Idle;
            *s = UniquenessStatus::Idle;
            changed
        });

        if !is_valid_email(email) {
            return;
        }

        let handle = tokio::spawn(debounce_then_probe(
            Arc::clone(&self.service),
            self.notifier.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.status),
            self.debounce,
            email.to_string(),
            token,
        ));
        self.replace_pending(Some(handle));
    }

    fn replace_pending(&self, handle: Option<JoinHandle<()>>) {
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = std::mem::replace(&mut *guard, handle) {
            old.abort();
        }
    }
}

impl Drop for UniquenessChecker {
    fn drop(&mut self) {
        self.replace_pending(None);
    }
}

async fn debounce_then_probe(
    service: Arc<dyn RegistrationService>,
    notifier: Notifier,
    state: Arc<RwLock<ProbeState>>,
    status: Arc<watch::Sender<UniquenessStatus>>,
    debounce: Duration,
    email: String,
    token: u64,
) {
    tokio::time::sleep(debounce).await;

    {
        let current = state.read().await;
        if current.token != token {
            return;
        }
        status.send_replace(UniquenessStatus::Checking);
    }
    debug!(token, "Checking email availability");

    // The probe runs detached: a later edit aborts only the debounce timer.
    tokio::spawn(async move {
        let result = service.email_exists(&email).await;

        let current = state.read().await;
        if current.token != token || current.email != email {
            debug!(token, latest = current.token, "Discarding stale availability result");
            return;
        }

        match result {
            Ok(taken) => {
                let verdict = if taken {
                    UniquenessStatus::Taken
                } else {
                    UniquenessStatus::Available
                };
                info!(token, status = %verdict, "Email availability resolved");
                status.send_replace(verdict);
            }
            Err(e) => {
                warn!(token, error = %e, "Email availability check failed");
                status.send_replace(UniquenessStatus::Idle);
                notifier.error(e.user_message("Could not check email availability"));
            }
        }
    });
}
