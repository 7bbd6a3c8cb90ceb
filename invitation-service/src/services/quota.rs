//! Bound on simultaneously active invitations per (email, institution).
//!
//! Only the arithmetic lives here. Repositories call [`InvitationQuota::check`]
//! while holding the pair's lock so count and insert cannot interleave.

/// Returned when another active invitation would exceed the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitReached {
    pub active: i64,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvitationQuota {
    pub max: u32,
}

impl InvitationQuota {
    pub fn new(max: u32) -> Self {
        Self { max }
    }

    /// Succeeds when one more active invitation still fits.
    pub fn check(&self, active_count: i64) -> Result<(), LimitReached> {
        if active_count >= i64::from(self.max) {
            Err(LimitReached {
                active: active_count,
                max: self.max,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for InvitationQuota {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Advisory lock key for one (email, institution) pair.
///
/// Postgres takes a single `bigint`, so the pair is folded through SHA-256.
pub fn pair_lock_key(email: &str, institution_id: uuid::Uuid) -> i64 {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(email.to_lowercase().as_bytes());
    hasher.update(institution_id.as_bytes());
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_allows_up_to_max() {
        let quota = InvitationQuota::new(3);
        assert!(quota.check(0).is_ok());
        assert!(quota.check(2).is_ok());
        assert_eq!(quota.check(3), Err(LimitReached { active: 3, max: 3 }));
        assert!(quota.check(7).is_err());
    }

    #[test]
    fn lock_key_ignores_email_case() {
        let institution = uuid::Uuid::new_v4();
        assert_eq!(
            pair_lock_key("Bob@Example.com", institution),
            pair_lock_key("bob@example.com", institution)
        );
        assert_ne!(
            pair_lock_key("bob@example.com", institution),
            pair_lock_key("bob@example.com", uuid::Uuid::new_v4())
        );
    }
}
