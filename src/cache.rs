//! Content-addressed memoisation for interview results.
//!
//! The cache is advisory: eviction or loss causes recomputation, never
//! incorrectness. It is shared process-wide across jobs, so the map must be
//! safe under concurrent access; redundant computation on a racing
//! check-then-insert is acceptable.
//!
//! The fingerprint deliberately excludes the question text: identical
//! persona/stakeholder pairs under the same brief, temperature, and style
//! share a result.

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::types::Interview;

/// Process-wide interview cache keyed by computation fingerprint.
#[derive(Default)]
pub struct InterviewCache {
    entries: DashMap<String, Interview>,
}

impl InterviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the inputs that determine an interview computation.
    pub fn fingerprint(
        persona_id: &str,
        stakeholder_id: &str,
        business_idea: &str,
        temperature: f64,
        response_style: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(persona_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(stakeholder_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(business_idea.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(format!("{:.4}", temperature).as_bytes());
        hasher.update(b"\x1f");
        hasher.update(response_style.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn get(&self, fingerprint: &str) -> Option<Interview> {
        self.entries.get(fingerprint).map(|entry| entry.clone())
    }

    pub fn insert(&self, fingerprint: String, interview: Interview) {
        self.entries.insert(fingerprint, interview);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
