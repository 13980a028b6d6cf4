//! Canonical job fingerprints.
//!
//! A fingerprint is the SHA-256 digest of a length-prefixed encoding of the
//! job's semantic content: operation kind, parameters sorted by name, input
//! size, the sorted set of datasets read and the chosen strategy id. Labels,
//! priorities, constraints and deadlines do not contribute, so two submissions
//! asking for the same work share a cache entry.

use std::fmt;

use qdb_hal::Param;
use sha2::{Digest, Sha256};

use crate::job::JobDescription;
use crate::planner::ExecutionPlan;

const ENCODING_VERSION: &[u8] = b"qdb-fp-v1";

/// Cache key for a planned job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex digits, for logs.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Fingerprint `job` as planned by `plan`.
pub fn fingerprint(job: &JobDescription, plan: &ExecutionPlan) -> Fingerprint {
    fingerprint_parts(job, plan.strategy_id())
}

pub(crate) fn fingerprint_parts(job: &JobDescription, strategy_id: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(ENCODING_VERSION);
    write_str(&mut hasher, &job.operation);

    let mut params: Vec<&(String, Param)> = job.params.iter().collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    hasher.update((params.len() as u64).to_le_bytes());
    for (name, value) in params {
        write_str(&mut hasher, name);
        write_param(&mut hasher, value);
    }

    hasher.update(job.input_size.to_le_bytes());

    let mut reads: Vec<&str> = job.reads.iter().map(String::as_str).collect();
    reads.sort_unstable();
    reads.dedup();
    hasher.update((reads.len() as u64).to_le_bytes());
    for dataset in reads {
        write_str(&mut hasher, dataset);
    }

    write_str(&mut hasher, strategy_id);
    Fingerprint(hasher.finalize().into())
}

fn write_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn write_param(hasher: &mut Sha256, value: &Param) {
    match value {
        Param::Bool(v) => {
            hasher.update([0u8]);
            hasher.update([u8::from(*v)]);
        }
        Param::Int(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
        Param::Float(v) => {
            // -0.0 and 0.0 compare equal and must hash equal.
            let v = if *v == 0.0 { 0.0f64 } else { *v };
            hasher.update([2u8]);
            hasher.update(v.to_bits().to_le_bytes());
        }
        Param::Text(v) => {
            hasher.update([3u8]);
            write_str(hasher, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Priority;
    use std::time::Duration;

    #[test]
    fn test_excludes_non_semantic_fields() {
        let base = JobDescription::new("lookup").with_param("key", 1).reading("users");
        let decorated = base
            .clone()
            .with_label("nightly")
            .with_priority(Priority::critical())
            .with_deadline(Duration::from_secs(5))
            .with_budget(99);

        assert_eq!(
            fingerprint_parts(&base, "idx"),
            fingerprint_parts(&decorated, "idx")
        );
    }

    #[test]
    fn test_semantic_fields_change_fingerprint() {
        let base = JobDescription::new("lookup").with_param("key", 1);
        let fp = fingerprint_parts(&base, "idx");

        assert_ne!(fp, fingerprint_parts(&base, "scan"));
        assert_ne!(
            fp,
            fingerprint_parts(&JobDescription::new("lookup").with_param("key", 2), "idx")
        );
        assert_ne!(
            fp,
            fingerprint_parts(&base.clone().with_input_size(1), "idx")
        );
        assert_ne!(fp, fingerprint_parts(&base.clone().reading("users"), "idx"));
    }

    #[test]
    fn test_param_types_are_distinguished() {
        let int = JobDescription::new("op").with_param("v", 1);
        let text = JobDescription::new("op").with_param("v", "1");
        let float = JobDescription::new("op").with_param("v", 1.0);
        let a = fingerprint_parts(&int, "s");
        let b = fingerprint_parts(&text, "s");
        let c = fingerprint_parts(&float, "s");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collisions() {
        let a = JobDescription::new("ab").with_param("c", "d");
        let b = JobDescription::new("a").with_param("bc", "d");
        assert_ne!(fingerprint_parts(&a, "s"), fingerprint_parts(&b, "s"));
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let pos = JobDescription::new("op").with_param("x", 0.0);
        let neg = JobDescription::new("op").with_param("x", -0.0);
        assert_eq!(fingerprint_parts(&pos, "s"), fingerprint_parts(&neg, "s"));
    }

    #[test]
    fn test_hex_display() {
        let fp = fingerprint_parts(&JobDescription::new("op"), "s");
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short(), hex[..8]);
    }
}
