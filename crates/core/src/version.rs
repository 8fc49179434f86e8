//! Optimistic concurrency expectations for stored rows.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a stored row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for migrations and fixtures).
    Any,
    /// Require the row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_version() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn exact_rejects_other_versions() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        match err {
            DomainError::Conflict(msg) => assert!(msg.contains("actual: 4")),
            _ => panic!("Expected Conflict error"),
        }
    }
}
