//! Live verification sessions hosted by the service.
//!
//! Each session gets its own in-memory store (the `userData`,
//! `voteVerified` and `hasVoted` keys) and a one-second clock. The clock stops
//! once the session is verified or expired; the session is then kept around
//! for the retention period so the voter can read the result or reset, and
//! dropped afterwards.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::time::Duration;
use tracing::{debug, info};
use ulid::Ulid;

use crate::verification::{
    timer::{spawn_countdown, spawn_ticker, Countdown, TimerHandle},
    CodeDelivery, MemoryStore, SessionConfig, SessionController, SessionSnapshot, UserRecord,
    VerificationError,
};

pub const DEFAULT_RETENTION_SECONDS: u64 = 5 * 60;

pub type SharedController = Arc<Mutex<SessionController>>;

struct SessionEntry {
    controller: SharedController,
    /// Bumped on every reset; clocks from older generations may not schedule cleanup.
    generation: u64,
    clock: Option<TimerHandle>,
    cleanup: Option<TimerHandle>,
}

pub struct SessionRegistry {
    config: SessionConfig,
    delivery: Arc<dyn CodeDelivery>,
    tick_period: Duration,
    retention_seconds: u64,
    sessions: Mutex<HashMap<Ulid, SessionEntry>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .field("tick_period", &self.tick_period)
            .field("retention_seconds", &self.retention_seconds)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: SessionConfig, delivery: Arc<dyn CodeDelivery>) -> Self {
        Self {
            config,
            delivery,
            tick_period: Duration::from_secs(1),
            retention_seconds: DEFAULT_RETENTION_SECONDS,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    #[must_use]
    pub fn with_retention_seconds(mut self, seconds: u64) -> Self {
        self.retention_seconds = seconds;
        self
    }

    /// Open a session for `user` and start its clock.
    ///
    /// # Errors
    /// Propagates user-record errors from [`SessionController::start`].
    pub fn create(
        self: &Arc<Self>,
        user: &UserRecord,
    ) -> Result<(Ulid, SessionSnapshot), VerificationError> {
        let store = Arc::new(MemoryStore::new());
        user.save(store.as_ref())?;

        let controller = SessionController::start(self.config.clone(), store, self.delivery.clone())?;
        let snapshot = controller.snapshot();

        let id = Ulid::new();
        let controller = Arc::new(Mutex::new(controller));
        let clock = self.spawn_clock(id, 0, controller.clone());

        self.lock().insert(
            id,
            SessionEntry {
                controller,
                generation: 0,
                clock: Some(clock),
                cleanup: None,
            },
        );

        info!(%id, "verification session opened");
        Ok((id, snapshot))
    }

    #[must_use]
    pub fn get(&self, id: &Ulid) -> Option<SharedController> {
        self.lock().get(id).map(|entry| entry.controller.clone())
    }

    /// Reset a session and put it back on the clock.
    ///
    /// Returns `None` if the session does not exist.
    pub fn reset(self: &Arc<Self>, id: &Ulid) -> Option<SessionSnapshot> {
        let controller = self.get(id)?;
        let snapshot = {
            let mut session = controller.lock().unwrap_or_else(PoisonError::into_inner);
            session.reset();
            session.snapshot()
        };

        let mut sessions = self.lock();
        let entry = sessions.get_mut(id)?;
        entry.generation += 1;
        entry.cleanup = None;
        entry.clock = Some(self.spawn_clock(*id, entry.generation, controller));

        Some(snapshot)
    }

    /// Drop a session and cancel its timers.
    pub fn remove(&self, id: &Ulid) -> bool {
        let removed = self.lock().remove(id);
        if removed.is_some() {
            info!(%id, "verification session closed");
        }
        removed.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Ulid, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_clock(
        self: &Arc<Self>,
        id: Ulid,
        generation: u64,
        controller: SharedController,
    ) -> TimerHandle {
        let registry = Arc::downgrade(self);

        spawn_ticker(self.tick_period, move || {
            let finished = {
                let mut session = controller.lock().unwrap_or_else(PoisonError::into_inner);
                let outcome = session.tick();
                if outcome.lockout_cleared {
                    debug!(%id, "lockout cleared");
                }
                session.is_finished()
            };

            if finished {
                schedule_cleanup(&registry, id, generation);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
    }
}

fn schedule_cleanup(registry: &Weak<SessionRegistry>, id: Ulid, generation: u64) {
    let Some(strong) = registry.upgrade() else {
        return;
    };

    let weak = registry.clone();
    let mut sessions = strong.lock();
    let Some(entry) = sessions.get_mut(&id) else {
        return;
    };

    // A reset may have raced this clock's last tick.
    let finished = entry
        .controller
        .lock()
        .is_ok_and(|session| session.is_finished());
    if entry.generation != generation || !finished {
        debug!(%id, generation, "stale clock, cleanup skipped");
        return;
    }

    if entry.cleanup.is_none() {
        debug!(%id, seconds = strong.retention_seconds, "session finished, scheduling cleanup");
        entry.cleanup = Some(spawn_countdown(
            Countdown::new(strong.retention_seconds),
            strong.tick_period,
            move || {
                if let Some(registry) = weak.upgrade() {
                    registry.remove(&id);
                }
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::{DeliveredCode, Stage};

    struct Silent;

    impl CodeDelivery for Silent {
        fn deliver(&self, _phone: &str, _code: &DeliveredCode<'_>) {}
    }

    fn user() -> UserRecord {
        UserRecord {
            name: "Meera Nair".to_string(),
            voter_id: "KLM1234567".to_string(),
            aadhaar: "4444 5555 6666".to_string(),
            phone: "9876500000".to_string(),
            constituency: "Thrissur".to_string(),
            ..UserRecord::default()
        }
    }

    fn registry(ttl: u64) -> Arc<SessionRegistry> {
        Arc::new(
            SessionRegistry::new(
                SessionConfig::default().with_session_ttl_seconds(ttl),
                Arc::new(Silent),
            )
            .with_retention_seconds(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn clock_counts_down() -> Result<(), VerificationError> {
        let registry = registry(600);
        let (id, snapshot) = registry.create(&user())?;
        assert_eq!(snapshot.session.session_seconds_remaining, 600);

        tokio::time::sleep(Duration::from_millis(3500)).await;

        let controller = registry.get(&id).expect("session");
        let remaining = controller
            .lock()
            .map(|s| s.session().session_seconds_remaining)
            .unwrap_or_default();
        assert_eq!(remaining, 597);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_dropped_after_retention() -> Result<(), VerificationError> {
        let registry = registry(3);
        let (id, _) = registry.create(&user())?;

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let stage = registry
            .get(&id)
            .and_then(|c| c.lock().ok().map(|s| s.stage()));
        assert_eq!(stage, Some(Stage::Expired));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reset_revives_expired_session() -> Result<(), VerificationError> {
        let registry = registry(2);
        let (id, _) = registry.create(&user())?;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let snapshot = registry.reset(&id).expect("reset");
        assert_eq!(snapshot.stage, Stage::MobileVerification);
        assert_eq!(snapshot.session.session_seconds_remaining, 2);

        // Still present after the first cleanup would have fired.
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(registry.get(&id).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn remove_drops_session() -> Result<(), VerificationError> {
        let registry = registry(600);
        let (id, _) = registry.create(&user())?;
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.get(&id).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn stale_clock_cannot_schedule_cleanup() -> Result<(), VerificationError> {
        let registry = registry(600);
        let (id, _) = registry.create(&user())?;
        let controller = registry.get(&id).expect("session");
        controller.lock().expect("lock").expire_session();

        registry.reset(&id).expect("reset");
        controller.lock().expect("lock").expire_session();

        // The generation-0 clock finishing late must not arm cleanup.
        schedule_cleanup(&Arc::downgrade(&registry), id, 0);
        assert!(registry.lock().get(&id).is_some_and(|e| e.cleanup.is_none()));

        // Current generation but the session is live again after another reset.
        registry.reset(&id).expect("reset");
        schedule_cleanup(&Arc::downgrade(&registry), id, 2);
        assert!(registry.lock().get(&id).is_some_and(|e| e.cleanup.is_none()));

        controller.lock().expect("lock").expire_session();
        schedule_cleanup(&Arc::downgrade(&registry), id, 2);
        assert!(registry.lock().get(&id).is_some_and(|e| e.cleanup.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_reset() {
        let registry = registry(600);
        assert!(registry.reset(&Ulid::new()).is_none());
    }
}
