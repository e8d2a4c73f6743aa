//! Versioned roster snapshots.
//!
//! The roster of enrolled students is read-only during matching. A
//! request takes an `Arc<RosterSnapshot>` at its start and completes
//! deterministically against that version; registration builds a new
//! snapshot and swaps it in, never mutating the one in flight.

use std::sync::{Arc, RwLock};

use crate::resolver::MatchError;
use crate::types::ReferenceProfile;

/// Immutable roster at one version.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    version: u64,
    profiles: Vec<ReferenceProfile>,
}

impl RosterSnapshot {
    /// Build a validated snapshot. Every profile's embedding must
    /// match the active encoder dimension, and student ids must be
    /// unique — violations are integration defects, not recognition
    /// edge cases.
    pub fn new(
        profiles: Vec<ReferenceProfile>,
        expected_dim: usize,
    ) -> Result<Self, MatchError> {
        Self::with_version(profiles, expected_dim, 0)
    }

    fn with_version(
        profiles: Vec<ReferenceProfile>,
        expected_dim: usize,
        version: u64,
    ) -> Result<Self, MatchError> {
        for p in &profiles {
            if p.reference_embedding.dim() != expected_dim {
                return Err(MatchError::DimensionMismatch {
                    expected: expected_dim,
                    got: p.reference_embedding.dim(),
                });
            }
        }
        for (i, p) in profiles.iter().enumerate() {
            if profiles[..i].iter().any(|q| q.student_id == p.student_id) {
                return Err(MatchError::MalformedRoster(format!(
                    "duplicate student id {:?}",
                    p.student_id
                )));
            }
        }
        Ok(Self { version, profiles })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn profiles(&self) -> &[ReferenceProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Copy-on-write handle over the current snapshot.
///
/// Readers clone the `Arc` cheaply; writers rebuild the profile list
/// and swap a fresh snapshot in under the write lock.
#[derive(Debug)]
pub struct RosterHandle {
    expected_dim: usize,
    current: RwLock<Arc<RosterSnapshot>>,
}

impl RosterHandle {
    pub fn new(expected_dim: usize) -> Self {
        let empty = RosterSnapshot { version: 0, profiles: Vec::new() };
        Self {
            expected_dim,
            current: RwLock::new(Arc::new(empty)),
        }
    }

    /// Current snapshot; matching holds this for the whole request.
    pub fn snapshot(&self) -> Arc<RosterSnapshot> {
        self.current.read().expect("roster lock poisoned").clone()
    }

    /// Insert or replace the profile for a student, producing a new
    /// snapshot version. Re-registration replaces wholesale.
    pub fn upsert(&self, profile: ReferenceProfile) -> Result<u64, MatchError> {
        if profile.reference_embedding.dim() != self.expected_dim {
            return Err(MatchError::DimensionMismatch {
                expected: self.expected_dim,
                got: profile.reference_embedding.dim(),
            });
        }

        let mut guard = self.current.write().expect("roster lock poisoned");
        let mut profiles = guard.profiles.clone();
        match profiles.iter_mut().find(|p| p.student_id == profile.student_id) {
            Some(slot) => *slot = profile,
            None => profiles.push(profile),
        }
        let version = guard.version + 1;
        let next = RosterSnapshot::with_version(profiles, self.expected_dim, version)?;
        *guard = Arc::new(next);
        tracing::debug!(version, students = guard.len(), "roster snapshot swapped");
        Ok(version)
    }

    /// Remove a student's profile; no-op version bump if absent.
    pub fn remove(&self, student_id: &str) -> u64 {
        let mut guard = self.current.write().expect("roster lock poisoned");
        let profiles: Vec<ReferenceProfile> = guard
            .profiles
            .iter()
            .filter(|p| p.student_id != student_id)
            .cloned()
            .collect();
        let version = guard.version + 1;
        *guard = Arc::new(RosterSnapshot { version, profiles });
        version
    }
}
