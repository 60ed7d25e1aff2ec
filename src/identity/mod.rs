//! Orphan-process identity tracking.
//!
//! - [`IdentityTracker`]: persisted name → process identity map with the startup
//!   orphan sweep
//! - [`ProcessProbe`] / [`SystemProbe`]: per-OS liveness, start tick and command line
//!   probing, kept apart from the verification logic

mod probe;
mod tracker;

pub use probe::{ProcessProbe, SystemProbe};
pub use tracker::{IDENTITY_FILE, IdentityEntry, IdentityTracker, MAX_UNVERIFIED_PASSES, Verdict};
