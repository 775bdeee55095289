use thiserror::Error;

/// Every way a verification action can be refused.
///
/// None of these are fatal; each one is a state the voter recovers from by
/// acting again (re-entering a code, waiting out a lockout, restarting the
/// session or switching method).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("Verification input did not match")]
    InputMismatch,

    #[error("Too many failed attempts, try again in {remaining_seconds}s")]
    LockedOut { remaining_seconds: u64 },

    #[error("Verification session expired")]
    SessionExpired,

    #[error("Device unavailable: {0}")]
    ExternalDeviceFailure(String),

    #[error("One-time code expired or was never issued")]
    CodeExpired,

    #[error("Invalid transition: {0}")]
    InvalidTransition(&'static str),

    #[error("No user data found for this session")]
    MissingUserData,

    #[error("Malformed user data: {0}")]
    MalformedUserData(String),
}

impl VerificationError {
    /// Failures that count toward the attempt tracker.
    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::InputMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_message_includes_remaining_seconds() {
        let err = VerificationError::LockedOut {
            remaining_seconds: 30,
        };
        assert_eq!(
            err.to_string(),
            "Too many failed attempts, try again in 30s"
        );
    }

    #[test]
    fn only_input_mismatch_counts_as_attempt() {
        assert!(VerificationError::InputMismatch.is_mismatch());
        assert!(!VerificationError::SessionExpired.is_mismatch());
        assert!(!VerificationError::ExternalDeviceFailure("camera".into()).is_mismatch());
        assert!(!VerificationError::CodeExpired.is_mismatch());
    }
}
