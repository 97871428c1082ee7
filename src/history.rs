//! Bounded newest-first history insertion
//!
//! Both entity histories go through [`prepend`]: grow stage events with no
//! cap, environment readings capped at [`ENVIRONMENT_HISTORY_CAP`]. The
//! function is pure so optimistic apply can keep the previous sequence
//! around for rollback.

/// Maximum readings retained per environment record.
pub const ENVIRONMENT_HISTORY_CAP: usize = 100;

/// Insert `entry` at the front of `existing`, returning a new sequence.
///
/// With a finite `cap`, entries past the cap are dropped from the tail
/// (oldest out first). `existing` is never mutated. No deduplication is
/// performed: a retried write that already landed server-side will produce
/// a second near-identical entry.
pub fn prepend<T: Clone>(entry: T, existing: &[T], cap: Option<usize>) -> Vec<T> {
    let mut next = Vec::with_capacity(existing.len() + 1);
    next.push(entry);
    next.extend_from_slice(existing);
    if let Some(cap) = cap {
        next.truncate(cap);
    }
    next
}
