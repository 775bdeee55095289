//! Per-session key/value storage and the records kept in it.
//!
//! Values are opaque strings. Three keys matter to verification:
//! `userData` (JSON user record, read at session start), `voteVerified`
//! (written when both steps pass) and `hasVoted` (set by the ballot flow,
//! only read here).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use utoipa::ToSchema;

use super::challenge::mask_digits;
use super::error::VerificationError;

pub const USER_DATA_KEY: &str = "userData";
pub const VOTE_VERIFIED_KEY: &str = "voteVerified";
pub const HAS_VOTED_KEY: &str = "hasVoted";

const FLAG_SET: &str = "true";

pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);

    fn flag(&self, key: &str) -> bool {
        self.get(key).as_deref() == Some(FLAG_SET)
    }

    fn set_flag(&self, key: &str) {
        self.set(key, FLAG_SET.to_string());
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Registered voter as stored under `userData`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "voterID")]
    pub voter_id: String,
    #[serde(default)]
    pub aadhaar: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub constituency: String,
    /// Fields this service does not read, stored back untouched.
    #[serde(flatten)]
    #[schema(ignore)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("name", &self.name)
            .field("voter_id", &self.voter_id)
            .field("aadhaar", &mask_digits(&self.aadhaar))
            .field("phone", &mask_digits(&self.phone))
            .field("constituency", &self.constituency)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl UserRecord {
    /// Read and decode the `userData` entry.
    ///
    /// # Errors
    /// `MissingUserData` when the key is absent, `MalformedUserData` when the
    /// value is not a JSON user object.
    pub fn load(store: &dyn SessionStore) -> Result<Self, VerificationError> {
        let raw = store
            .get(USER_DATA_KEY)
            .ok_or(VerificationError::MissingUserData)?;

        serde_json::from_str(&raw).map_err(|e| VerificationError::MalformedUserData(e.to_string()))
    }

    /// # Errors
    /// `MalformedUserData` if the record cannot be encoded.
    pub fn save(&self, store: &dyn SessionStore) -> Result<(), VerificationError> {
        let raw = serde_json::to_string(self)
            .map_err(|e| VerificationError::MalformedUserData(e.to_string()))?;
        store.set(USER_DATA_KEY, raw);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BallotAccess {
    Granted,
    NotVerified,
    AlreadyVoted,
}

/// Gate checked before showing the ballot.
pub fn ballot_access(store: &dyn SessionStore) -> BallotAccess {
    if store.flag(HAS_VOTED_KEY) {
        BallotAccess::AlreadyVoted
    } else if store.flag(VOTE_VERIFIED_KEY) {
        BallotAccess::Granted
    } else {
        BallotAccess::NotVerified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k"), None);
        store.set("k", "v".to_string());
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn flags_are_literal_true() {
        let store = MemoryStore::new();
        store.set(VOTE_VERIFIED_KEY, "yes".to_string());
        assert!(!store.flag(VOTE_VERIFIED_KEY));
        store.set_flag(VOTE_VERIFIED_KEY);
        assert!(store.flag(VOTE_VERIFIED_KEY));
    }

    #[test]
    fn load_missing_user_data() {
        let store = MemoryStore::new();
        assert_eq!(
            UserRecord::load(&store),
            Err(VerificationError::MissingUserData)
        );
    }

    #[test]
    fn load_malformed_user_data() {
        let store = MemoryStore::new();
        store.set(USER_DATA_KEY, "{not json".to_string());
        assert!(matches!(
            UserRecord::load(&store),
            Err(VerificationError::MalformedUserData(_))
        ));
    }

    #[test]
    fn load_ignores_unknown_fields() -> Result<(), VerificationError> {
        let store = MemoryStore::new();
        store.set(
            USER_DATA_KEY,
            r#"{"name":"Ravi","voterID":"XYZ7654321","aadhaar":"111122223333","phone":"9000000001","constituency":"Pune","dob":"1990-01-01"}"#
                .to_string(),
        );
        let user = UserRecord::load(&store)?;
        assert_eq!(user.voter_id, "XYZ7654321");
        assert_eq!(user.constituency, "Pune");
        Ok(())
    }

    #[test]
    fn save_keeps_unknown_fields() -> Result<(), VerificationError> {
        let store = MemoryStore::new();
        store.set(
            USER_DATA_KEY,
            r#"{"name":"R","phone":"9000000001","dob":"1990-01-01","ward":{"no":12}}"#.to_string(),
        );

        let user = UserRecord::load(&store)?;
        assert_eq!(user.extra.get("dob"), Some(&Value::from("1990-01-01")));

        user.save(&store)?;
        let stored: Value = store
            .get(USER_DATA_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        assert_eq!(stored["dob"], "1990-01-01");
        assert_eq!(stored["ward"]["no"], 12);
        assert_eq!(stored["name"], "R");
        assert_eq!(UserRecord::load(&store)?, user);
        Ok(())
    }

    #[test]
    fn debug_masks_identifiers() {
        let user = UserRecord {
            aadhaar: "111122223333".to_string(),
            phone: "9000000001".to_string(),
            ..UserRecord::default()
        };
        let rendered = format!("{user:?}");
        assert!(!rendered.contains("111122223333"));
        assert!(!rendered.contains("9000000001"));
        assert!(rendered.contains("3333"));
    }

    #[test]
    fn ballot_gate() {
        let store = MemoryStore::new();
        assert_eq!(ballot_access(&store), BallotAccess::NotVerified);
        store.set_flag(VOTE_VERIFIED_KEY);
        assert_eq!(ballot_access(&store), BallotAccess::Granted);
        store.set_flag(HAS_VOTED_KEY);
        assert_eq!(ballot_access(&store), BallotAccess::AlreadyVoted);
    }
}
