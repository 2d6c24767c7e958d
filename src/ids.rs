//! Short opaque identifier allocation for sessions and pages.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;

/// Length of session and page identifiers.
pub const ID_LEN: usize = 8;

/// Allocate an 8-character alphanumeric id not present in `existing`.
///
/// `thread_rng` is cryptographically seeded, so the 62^8 space makes
/// retries vanishingly rare; callers never observe a collision.
pub fn allocate(existing: &HashSet<String>) -> String {
    loop {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_LEN)
            .map(char::from)
            .collect();
        if !existing.contains(&id) {
            return id;
        }
    }
}
