use serde::Serialize;

use crate::db::Database;
use crate::error::StudioError;

pub const DEFAULT_DAILY_LIMIT: i64 = 60;

#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
}

/// Gates a user's generations against the configured daily cap. `used` is
/// derived from the history log, so the check-then-log sequence is not
/// atomic; two concurrent requests from the same user can both pass. Accepted
/// for a single-editor tool.
pub fn check(
    db: &Database,
    user_id: i64,
    configured_limit: i64,
) -> Result<RateLimitStatus, StudioError> {
    let limit = if configured_limit <= 0 {
        DEFAULT_DAILY_LIMIT
    } else {
        configured_limit
    };
    let used = db.count_today(user_id)?;
    Ok(RateLimitStatus {
        allowed: used < limit,
        used,
        limit,
        remaining: (limit - used).max(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sample_entry;

    #[test]
    fn fresh_store_allows_generation() {
        let db = Database::open_in_memory().unwrap();
        let status = check(&db, 1, 60).unwrap();
        assert!(status.allowed);
        assert_eq!(status.used, 0);
        assert_eq!(status.remaining, 60);
    }

    #[test]
    fn unprovisioned_store_reads_as_unused() {
        // No history table at all, as on a first run before any insert.
        let db = Database::open_unprovisioned();
        let status = check(&db, 1, 60).unwrap();
        assert!(status.allowed);
        assert_eq!(status.used, 0);
        assert_eq!(status.remaining, 60);
    }

    #[test]
    fn cap_is_enforced_at_the_boundary() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..59 {
            db.insert_history(&sample_entry(1)).unwrap();
        }
        let status = check(&db, 1, 60).unwrap();
        assert!(status.allowed);
        assert_eq!(status.used, 59);
        assert_eq!(status.remaining, 1);

        db.insert_history(&sample_entry(1)).unwrap();
        let status = check(&db, 1, 60).unwrap();
        assert!(!status.allowed);
        assert_eq!(status.used, 60);
        assert_eq!(status.remaining, 0);
    }

    #[test]
    fn non_positive_limit_is_coerced_to_default() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(check(&db, 1, 0).unwrap().limit, 60);
        assert_eq!(check(&db, 1, -5).unwrap().limit, 60);
    }

    #[test]
    fn other_users_do_not_consume_the_cap() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..3 {
            db.insert_history(&sample_entry(2)).unwrap();
        }
        let status = check(&db, 1, 3).unwrap();
        assert!(status.allowed);
        assert_eq!(status.used, 0);
    }
}
