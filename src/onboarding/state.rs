//! Registration step state machine.

use serde::{Deserialize, Serialize};

use super::rules::FieldErrors;

/// The steps of the registration flow.
///
/// Progresses linearly: Identity → Email → Phone → DeliveryMethod →
/// Verification → Credentials → Submitted. Any non-terminal step past the
/// first may step back by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Identity,
    Email,
    Phone,
    DeliveryMethod,
    Verification,
    Credentials,
    Submitted,
}

impl OnboardingStep {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: OnboardingStep) -> bool {
        use OnboardingStep::*;
        matches!(
            (self, target),
            (Identity, Email)
                | (Email, Phone)
                | (Phone, DeliveryMethod)
                | (DeliveryMethod, Verification)
                | (Verification, Credentials)
                | (Credentials, Submitted)
                // Back
                | (Email, Identity)
                | (Phone, Email)
                | (DeliveryMethod, Phone)
                | (Verification, DeliveryMethod)
                | (Credentials, Verification)
        )
    }

    /// Whether this step is terminal (account created).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted)
    }

    /// Next step in the forward progression, if any.
    pub fn next(&self) -> Option<OnboardingStep> {
        use OnboardingStep::*;
        match self {
            Identity => Some(Email),
            Email => Some(Phone),
            Phone => Some(DeliveryMethod),
            DeliveryMethod => Some(Verification),
            Verification => Some(Credentials),
            Credentials => Some(Submitted),
            Submitted => None,
        }
    }

    /// Previous step, if stepping back is allowed from here.
    pub fn previous(&self) -> Option<OnboardingStep> {
        use OnboardingStep::*;
        match self {
            Identity | Submitted => None,
            Email => Some(Identity),
            Phone => Some(Email),
            DeliveryMethod => Some(Phone),
            Verification => Some(DeliveryMethod),
            Credentials => Some(Verification),
        }
    }

    /// 1-based step number as shown to the user. `Submitted` is 7.
    pub fn number(&self) -> u8 {
        use OnboardingStep::*;
        match self {
            Identity => 1,
            Email => 2,
            Phone => 3,
            DeliveryMethod => 4,
            Verification => 5,
            Credentials => 6,
            Submitted => 7,
        }
    }
}

impl Default for OnboardingStep {
    fn default() -> Self {
        Self::Identity
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Identity => "identity",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::DeliveryMethod => "delivery_method",
            Self::Verification => "verification",
            Self::Credentials => "credentials",
            Self::Submitted => "submitted",
        };
        write!(f, "{s}")
    }
}

/// Sequencer-owned step state.
#[derive(Debug, Clone, Default)]
pub struct StepState {
    /// Current step.
    pub step: OnboardingStep,
    /// Errors from the most recent validation of `step`.
    pub errors: FieldErrors,
    /// Set while the final submission is outstanding.
    pub is_submitting: bool,
}

impl StepState {
    /// Move one step forward. Clears the step-scoped errors.
    pub fn advance(&mut self) -> Result<OnboardingStep, String> {
        let next = self
            .step
            .next()
            .ok_or_else(|| "Already at terminal step".to_string())?;
        self.transition(next)
    }

    /// Move one step back. Clears the step-scoped errors.
    pub fn retreat(&mut self) -> Result<OnboardingStep, String> {
        let previous = self
            .step
            .previous()
            .ok_or_else(|| format!("Cannot go back from {}", self.step))?;
        self.transition(previous)
    }

    fn transition(&mut self, target: OnboardingStep) -> Result<OnboardingStep, String> {
        if !self.step.can_transition_to(target) {
            return Err(format!("Cannot transition from {} to {}", self.step, target));
        }
        self.step = target;
        self.errors.clear();
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::rules::Field;

    const FORWARD: [OnboardingStep; 7] = [
        OnboardingStep::Identity,
        OnboardingStep::Email,
        OnboardingStep::Phone,
        OnboardingStep::DeliveryMethod,
        OnboardingStep::Verification,
        OnboardingStep::Credentials,
        OnboardingStep::Submitted,
    ];

    #[test]
    fn forward_transitions() {
        for pair in FORWARD.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} should transition to {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn invalid_transitions() {
        use OnboardingStep::*;
        // Skip steps
        assert!(!Identity.can_transition_to(Phone));
        assert!(!DeliveryMethod.can_transition_to(Credentials));
        assert!(!Phone.can_transition_to(Submitted));
        // Terminal
        assert!(!Submitted.can_transition_to(Credentials));
        // Self-transition
        assert!(!Email.can_transition_to(Email));
    }

    #[test]
    fn numbers_are_sequential() {
        for (i, step) in FORWARD.iter().enumerate() {
            assert_eq!(step.number() as usize, i + 1);
        }
    }

    #[test]
    fn display_matches_serde() {
        for step in FORWARD {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(format!("\"{step}\""), json);
        }
    }

    #[test]
    fn state_walks_forward_and_back() {
        let mut state = StepState::default();
        for expected in &FORWARD[1..] {
            state.errors.insert(Field::Email, "stale");
            assert_eq!(state.advance().unwrap(), *expected);
            assert!(state.errors.is_empty(), "errors should clear on advance");
        }
        assert!(state.advance().is_err());
        assert!(state.retreat().is_err(), "no going back after submission");
    }

    #[test]
    fn retreat_stops_at_first_step() {
        let mut state = StepState::default();
        assert!(state.retreat().is_err());

        state.advance().unwrap();
        state.advance().unwrap();
        assert_eq!(state.retreat().unwrap(), OnboardingStep::Email);
        assert_eq!(state.retreat().unwrap(), OnboardingStep::Identity);
        assert!(state.retreat().is_err());
    }
}
