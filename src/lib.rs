//! # Voterpass
//!
//! Two-step voter verification. A voter opens a session with their registered
//! details, proves control of their phone by picking the number sent to it,
//! then proves identity with one of five methods: facial recognition, an
//! identity document, a fingerprint, a drawn signature, or security answers
//! plus a one-time code.
//!
//! Five failed attempts lock the session for 30 seconds. Attempts during the
//! lockout are refused without counting, and the count starts over once it
//! ends. Every session is bounded by a ten-minute countdown. A verified
//! session sets the `voteVerified` flag that gates access to the ballot.
//!
//! The [`verification`] module holds the state machine and is usable on its
//! own; [`voterpass`] hosts sessions behind an HTTP API and [`cli`] wires both
//! into the `voterpass` binary.

pub mod cli;
pub mod verification;
pub mod voterpass;
