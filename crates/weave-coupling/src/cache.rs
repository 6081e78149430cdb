//! Deterministic cache keys for coupling runs.
//!
//! A coupling result is a pure function of its parameters and the commit
//! range it consumed, so `sha256(parameters, range)` identifies it.

use sha2::{Digest, Sha256};

use crate::coupling::{CommitRange, CouplingParams};

/// Cache key for a coupling run over `range` with `params`.
///
/// # Examples
///
/// ```
/// use weave_coupling::cache::cache_key;
/// use weave_coupling::coupling::{CommitRange, CouplingParams};
///
/// let range = CommitRange { first: Some("a".into()), last: Some("b".into()), count: 2 };
/// let key = cache_key(&CouplingParams::default(), &range);
/// assert_eq!(key.len(), 64);
/// assert_eq!(key, cache_key(&CouplingParams::default(), &range));
/// ```
pub fn cache_key(params: &CouplingParams, range: &CommitRange) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"coupling/v1\n");
    hasher.update(format!("min_support={}\n", params.min_support));
    hasher.update(format!("min_coupling={:?}\n", params.min_coupling));
    hasher.update(format!("max_changeset_size={}\n", params.max_changeset_size));
    hasher.update(format!("first={}\n", range.first.as_deref().unwrap_or("")));
    hasher.update(format!("last={}\n", range.last.as_deref().unwrap_or("")));
    hasher.update(format!("count={}\n", range.count));
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(count: u64) -> CommitRange {
        CommitRange {
            first: Some("0a1b".into()),
            last: Some("9f8e".into()),
            count,
        }
    }

    #[test]
    fn key_changes_with_parameters() {
        let base = cache_key(&CouplingParams::default(), &range(10));
        let stricter = CouplingParams {
            min_support: 5,
            ..CouplingParams::default()
        };
        assert_ne!(base, cache_key(&stricter, &range(10)));
    }

    #[test]
    fn key_changes_with_range() {
        let params = CouplingParams::default();
        assert_ne!(cache_key(&params, &range(10)), cache_key(&params, &range(11)));
    }

    #[test]
    fn batch_size_does_not_affect_key() {
        let small_batches = CouplingParams {
            batch_size: 1,
            ..CouplingParams::default()
        };
        assert_eq!(
            cache_key(&CouplingParams::default(), &range(3)),
            cache_key(&small_batches, &range(3))
        );
    }
}
