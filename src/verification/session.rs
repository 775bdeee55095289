//! The verification session controller.
//!
//! A session walks `MobileVerification` → `IdentityVerification` →
//! `Verified`, and drops to `Expired` from anywhere when its countdown runs
//! out. All state lives in one [`SessionController`]; step handlers only see
//! it through the transition methods below.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::challenge::{CodeDelivery, DeliveredCode, IssuedOtp, MobileChallenge};
use super::error::VerificationError;
use super::lockout::{AttemptTracker, LockoutPolicy};
use super::method::{
    CheckContext, IdentityEvidence, OutcomeSampler, RandomSampler, VerificationMethod,
};
use super::storage::{SessionStore, UserRecord, VOTE_VERIFIED_KEY};
use super::timer::{Countdown, Tick};

pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 10 * 60;
pub const DEFAULT_OTP_TTL_SECONDS: u64 = 2 * 60;
pub const DEFAULT_FACIAL_FALLBACK_AFTER: u32 = 2;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    session_ttl_seconds: u64,
    otp_ttl_seconds: u64,
    facial_fallback_after: u32,
    lockout: LockoutPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            facial_fallback_after: DEFAULT_FACIAL_FALLBACK_AFTER,
            lockout: LockoutPolicy::default(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: u64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_facial_fallback_after(mut self, failures: u32) -> Self {
        self.facial_fallback_after = failures.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, policy: LockoutPolicy) -> Self {
        self.lockout = policy;
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn otp_ttl_seconds(&self) -> u64 {
        self.otp_ttl_seconds
    }

    #[must_use]
    pub fn facial_fallback_after(&self) -> u32 {
        self.facial_fallback_after
    }

    #[must_use]
    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MobileVerification,
    IdentityVerification,
    Verified,
    Expired,
}

/// Session state as seen by step handlers. Only the controller mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VerificationSession {
    pub current_step: u8,
    pub chosen_method: VerificationMethod,
    pub mobile_verified: bool,
    pub identity_verified: bool,
    pub session_seconds_remaining: u64,
    pub facial_attempts: u32,
    pub facial_recognition_failed: bool,
    pub expired: bool,
}

impl VerificationSession {
    fn new(session_seconds: u64) -> Self {
        Self {
            current_step: 1,
            chosen_method: VerificationMethod::Mobile,
            mobile_verified: false,
            identity_verified: false,
            session_seconds_remaining: session_seconds,
            facial_attempts: 0,
            facial_recognition_failed: false,
            expired: false,
        }
    }

    #[must_use]
    pub const fn stage(&self) -> Stage {
        if self.expired {
            Stage::Expired
        } else if self.mobile_verified && self.identity_verified {
            Stage::Verified
        } else if self.current_step == 2 {
            Stage::IdentityVerification
        } else {
            Stage::MobileVerification
        }
    }
}

/// Point-in-time view handed to callers after every transition.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub stage: Stage,
    pub session: VerificationSession,
    pub attempts: AttemptTracker,
    /// Present while the mobile step is pending.
    #[schema(value_type = Option<Vec<u8>>)]
    pub challenge_options: Option<[u8; 3]>,
    pub alternative_offered: bool,
    pub otp_seconds_remaining: Option<u64>,
}

/// What one clock tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub expired: bool,
    pub lockout_cleared: bool,
    pub otp_expired: bool,
}

pub struct SessionController {
    config: SessionConfig,
    session: VerificationSession,
    clock: Countdown,
    tracker: AttemptTracker,
    challenge: MobileChallenge,
    otp: Option<IssuedOtp>,
    user: UserRecord,
    store: Arc<dyn SessionStore>,
    delivery: Arc<dyn CodeDelivery>,
    rng: StdRng,
    sampler: Box<dyn OutcomeSampler>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("session", &self.session)
            .field("tracker", &self.tracker)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Start a session for the user stored under `userData`.
    ///
    /// # Errors
    /// Returns `MissingUserData` or `MalformedUserData` when the store has no
    /// usable user record.
    pub fn start(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        delivery: Arc<dyn CodeDelivery>,
    ) -> Result<Self, VerificationError> {
        Self::start_with(
            config,
            store,
            delivery,
            StdRng::from_entropy(),
            Box::new(RandomSampler::new()),
        )
    }

    /// Like [`SessionController::start`] with explicit randomness sources.
    ///
    /// # Errors
    /// Same as [`SessionController::start`].
    pub fn start_with(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        delivery: Arc<dyn CodeDelivery>,
        mut rng: StdRng,
        sampler: Box<dyn OutcomeSampler>,
    ) -> Result<Self, VerificationError> {
        let user = UserRecord::load(store.as_ref())?;
        let challenge = MobileChallenge::generate(&mut rng);

        let controller = Self {
            session: VerificationSession::new(config.session_ttl_seconds),
            clock: Countdown::new(config.session_ttl_seconds),
            tracker: AttemptTracker::new(config.lockout),
            challenge,
            otp: None,
            user,
            store,
            delivery,
            rng,
            sampler,
            config,
        };

        debug!(user = ?controller.user, "verification session started");
        controller.send_challenge();

        Ok(controller)
    }

    #[must_use]
    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    #[must_use]
    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.session.stage()
    }

    /// True once the session reached a state no tick can change.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.stage(), Stage::Verified | Stage::Expired)
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let stage = self.stage();
        SessionSnapshot {
            stage,
            session: self.session.clone(),
            attempts: self.tracker,
            challenge_options: (stage == Stage::MobileVerification)
                .then(|| self.challenge.options()),
            alternative_offered: self.session.facial_recognition_failed,
            otp_seconds_remaining: self
                .otp
                .as_ref()
                .filter(|otp| !otp.is_expired())
                .map(IssuedOtp::seconds_remaining),
        }
    }

    /// Check the number the voter picked against the code sent to their phone.
    ///
    /// # Errors
    /// `InputMismatch` (a new challenge is sent), `LockedOut` when this or an
    /// earlier failure tripped the lockout, `SessionExpired`, or
    /// `InvalidTransition` once the mobile step is done.
    #[instrument(skip(self), fields(stage = ?self.stage()))]
    pub fn verify_mobile_code(&mut self, selected: u8) -> Result<(), VerificationError> {
        self.ensure_active()?;
        if self.session.current_step != 1 {
            return Err(VerificationError::InvalidTransition(
                "mobile number already verified",
            ));
        }

        if self.challenge.is_correct(selected) {
            self.session.mobile_verified = true;
            self.session.current_step = 2;
            self.session.chosen_method = VerificationMethod::Facial;
            info!("mobile number verified");
            return Ok(());
        }

        self.challenge = MobileChallenge::generate(&mut self.rng);
        self.send_challenge();
        Err(self.fail())
    }

    /// Success signal from an identity method.
    ///
    /// # Errors
    /// `InvalidTransition` unless the mobile step is done, the session is not
    /// yet verified and `method` is the chosen identity method.
    #[instrument(skip(self))]
    pub fn complete_identity_verification(
        &mut self,
        method: VerificationMethod,
    ) -> Result<(), VerificationError> {
        self.ensure_active()?;
        self.ensure_identity_step()?;
        if !method.is_identity() || method != self.session.chosen_method {
            return Err(VerificationError::InvalidTransition(
                "method is not the chosen identity method",
            ));
        }

        self.session.identity_verified = true;
        self.tracker.reset();
        self.otp = None;
        self.store.set_flag(VOTE_VERIFIED_KEY);

        info!(%method, "identity verified, voter cleared for ballot");
        Ok(())
    }

    /// Run the chosen method's check and complete verification on success.
    ///
    /// # Errors
    /// `InputMismatch` or `LockedOut` when the evidence is rejected,
    /// `ExternalDeviceFailure` when a capture device was unavailable,
    /// `CodeExpired` for a missing or expired alternative code,
    /// `InvalidTransition` when the evidence is for another method.
    #[instrument(skip(self, evidence), fields(method = %evidence.method()))]
    pub fn submit_identity(&mut self, evidence: &IdentityEvidence) -> Result<(), VerificationError> {
        self.ensure_active()?;
        self.ensure_identity_step()?;

        let method = evidence.method();
        if method != self.session.chosen_method {
            return Err(VerificationError::InvalidTransition(
                "evidence does not match the chosen method",
            ));
        }

        let mut ctx = CheckContext {
            user: &self.user,
            otp: self.otp.as_ref(),
            sampler: self.sampler.as_mut(),
        };

        match evidence.check(&mut ctx) {
            Ok(()) => self.complete_identity_verification(method),
            Err(err) => {
                if method == VerificationMethod::Facial {
                    self.record_facial_failure();
                }
                debug!(error = %err, "identity check failed");
                if err.is_mismatch() {
                    Err(self.fail())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Pick another identity method during step 2.
    ///
    /// # Errors
    /// `SessionExpired`, or `InvalidTransition` outside step 2, after
    /// verification, or when `method` is not an identity method.
    #[instrument(skip(self))]
    pub fn switch_method(&mut self, method: VerificationMethod) -> Result<(), VerificationError> {
        if self.session.expired {
            return Err(VerificationError::SessionExpired);
        }
        self.ensure_identity_step()?;
        if !method.is_identity() {
            return Err(VerificationError::InvalidTransition(
                "mobile is not an identity method",
            ));
        }

        if method != self.session.chosen_method {
            info!(from = %self.session.chosen_method, to = %method, "verification method switched");
            self.session.chosen_method = method;
        }

        Ok(())
    }

    /// Send a one-time code for the alternative method.
    ///
    /// # Errors
    /// `SessionExpired`, `LockedOut`, or `InvalidTransition` unless the
    /// alternative method is chosen.
    #[instrument(skip(self))]
    pub fn request_alternative_otp(&mut self) -> Result<(), VerificationError> {
        self.ensure_active()?;
        self.ensure_identity_step()?;
        if self.session.chosen_method != VerificationMethod::Alternative {
            return Err(VerificationError::InvalidTransition(
                "alternative method not chosen",
            ));
        }

        let otp = IssuedOtp::generate(&mut self.rng, self.config.otp_ttl_seconds);
        self.delivery
            .deliver(&self.user.phone, &DeliveredCode::AlternativeOtp(otp.code()));
        self.otp = Some(otp);

        Ok(())
    }

    /// Invalidate the session. Returns `false` if it had already expired.
    pub fn expire_session(&mut self) -> bool {
        if self.session.expired {
            return false;
        }

        self.session.expired = true;
        self.session.session_seconds_remaining = 0;
        self.otp = None;
        warn!(stage = ?self.session.stage(), "verification session expired");

        true
    }

    /// Advance every clock by one second.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if !self.is_finished() {
            match self.clock.tick() {
                Tick::Running(remaining) => self.session.session_seconds_remaining = remaining,
                Tick::Expired => outcome.expired = self.expire_session(),
                Tick::Idle => {}
            }
        }

        let was_locked = self.tracker.is_locked_out();
        outcome.lockout_cleared = was_locked && !self.tracker.tick_lockout().is_locked_out();

        if let Some(otp) = self.otp.as_mut() {
            outcome.otp_expired = otp.tick() == Tick::Expired;
        }

        outcome
    }

    /// Start over from the mobile step with fresh clocks and counters.
    ///
    /// A running lockout survives the reset and keeps counting down.
    #[instrument(skip(self))]
    pub fn reset(&mut self) {
        self.session = VerificationSession::new(self.config.session_ttl_seconds);
        self.clock.restart();
        if !self.tracker.is_locked_out() {
            self.tracker.reset();
        }
        self.otp = None;
        self.store.remove(VOTE_VERIFIED_KEY);
        self.challenge = MobileChallenge::generate(&mut self.rng);
        self.send_challenge();
        info!("verification session reset");
    }

    fn ensure_active(&self) -> Result<(), VerificationError> {
        if self.session.expired {
            return Err(VerificationError::SessionExpired);
        }
        if self.tracker.is_locked_out() {
            return Err(VerificationError::LockedOut {
                remaining_seconds: self.tracker.lockout_seconds_remaining(),
            });
        }
        Ok(())
    }

    fn ensure_identity_step(&self) -> Result<(), VerificationError> {
        match self.stage() {
            Stage::IdentityVerification => Ok(()),
            Stage::MobileVerification => Err(VerificationError::InvalidTransition(
                "mobile verification pending",
            )),
            Stage::Verified => Err(VerificationError::InvalidTransition(
                "session already verified",
            )),
            Stage::Expired => Err(VerificationError::SessionExpired),
        }
    }

    fn fail(&mut self) -> VerificationError {
        let tracker = self.tracker.record_failure();
        if tracker.is_locked_out() {
            VerificationError::LockedOut {
                remaining_seconds: tracker.lockout_seconds_remaining(),
            }
        } else {
            VerificationError::InputMismatch
        }
    }

    fn record_facial_failure(&mut self) {
        self.session.facial_attempts = self.session.facial_attempts.saturating_add(1);
        if self.session.facial_attempts >= self.config.facial_fallback_after
            && !self.session.facial_recognition_failed
        {
            self.session.facial_recognition_failed = true;
            info!(
                attempts = self.session.facial_attempts,
                "facial recognition failed, offering alternative method"
            );
        }
    }

    fn send_challenge(&self) {
        self.delivery.deliver(
            &self.user.phone,
            &DeliveredCode::MobileChallenge(self.challenge.expected()),
        );
    }

    #[cfg(test)]
    pub(crate) fn expected_code(&self) -> u8 {
        self.challenge.expected()
    }

    #[cfg(test)]
    pub(crate) fn issued_otp(&self) -> Option<&IssuedOtp> {
        self.otp.as_ref()
    }
}
