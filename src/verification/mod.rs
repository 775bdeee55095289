//! Voter verification sessions.
//!
//! A voter first proves control of their registered phone by picking the
//! code it received, then proves identity with one of five methods. Failed
//! attempts feed an exponential lockout and the whole session is bounded by a
//! countdown.

pub mod challenge;
pub mod error;
pub mod lockout;
pub mod method;
pub mod session;
pub mod storage;
pub mod timer;

pub use self::challenge::{CodeDelivery, DeliveredCode, LogDelivery};
pub use self::error::VerificationError;
pub use self::lockout::{AttemptTracker, LockoutPolicy};
pub use self::method::{IdentityEvidence, VerificationMethod};
pub use self::session::{SessionConfig, SessionController, SessionSnapshot, Stage};
pub use self::storage::{MemoryStore, SessionStore, UserRecord};
