//! Tests for lock bookkeeping.

use super::*;
use std::collections::HashSet;

fn envelope(message_type: &str) -> MessageEnvelope {
    MessageEnvelope::from_string(None, message_type, "body")
}

mod locked_message {
    use super::*;

    #[test]
    fn test_new_lock_expires_after_timeout() {
        let locked = LockedMessage::new(envelope("a"), Duration::minutes(5));

        assert!(!locked.is_expired());
        assert_eq!(locked.timeout(), Duration::minutes(5));
        let remaining = locked.expiration_time().as_datetime() - Timestamp::now().as_datetime();
        assert!(remaining > Duration::minutes(4));
    }

    #[test]
    fn test_zero_timeout_is_expired_immediately() {
        let locked = LockedMessage::new(envelope("a"), Duration::zero());
        assert!(locked.is_expired());
    }

    /// Renewal resets the expiration instead of extending it.
    #[test]
    fn test_renew_resets_rather_than_accumulates() {
        let mut locked = LockedMessage::new(envelope("a"), Duration::minutes(30));

        locked.renew(Duration::seconds(10));

        assert_eq!(locked.timeout(), Duration::seconds(10));
        let remaining = locked.expiration_time().as_datetime() - Timestamp::now().as_datetime();
        assert!(remaining <= Duration::seconds(10));
        assert!(remaining > Duration::seconds(5));
    }
}

mod lock_table {
    use super::*;

    #[test]
    fn test_lock_stamps_token_and_records_entry() {
        let mut table = LockTable::new();

        let checked_out = table.lock(envelope("a"), Duration::minutes(1));

        let token = checked_out.lock_token().expect("token stamped");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(token).unwrap().message().message_type(), "a");
    }

    #[test]
    fn test_tokens_are_unique_and_increasing() {
        let mut table = LockTable::new();
        let mut seen = HashSet::new();
        let mut previous = None;

        for i in 0..100 {
            let locked = table.lock(envelope(&i.to_string()), Duration::minutes(1));
            let token = locked.lock_token().unwrap();
            assert!(seen.insert(token), "token {} issued twice", token);
            if let Some(prev) = previous {
                assert!(token > prev);
            }
            previous = Some(token);
        }
    }

    #[test]
    fn test_tokens_are_not_reused_after_clear_or_remove() {
        let mut table = LockTable::new();
        let first = table.lock(envelope("a"), Duration::minutes(1)).lock_token().unwrap();
        table.remove(first);
        table.clear();

        let second = table.lock(envelope("b"), Duration::minutes(1)).lock_token().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_renew_live_lock() {
        let mut table = LockTable::new();
        let token = table.lock(envelope("a"), Duration::seconds(1)).lock_token().unwrap();

        assert!(table.renew(token, Duration::minutes(10)));
        assert_eq!(table.get(token).unwrap().timeout(), Duration::minutes(10));
    }

    #[test]
    fn test_renew_expired_or_unknown_lock_is_refused() {
        let mut table = LockTable::new();
        let token = table.lock(envelope("a"), Duration::zero()).lock_token().unwrap();

        assert!(!table.renew(token, Duration::minutes(10)));
        assert!(!table.renew(LockToken::new(999), Duration::minutes(10)));
        assert_eq!(table.get(token).unwrap().timeout(), Duration::zero());
    }

    #[test]
    fn test_remove_ignores_expiry() {
        let mut table = LockTable::new();
        let token = table.lock(envelope("a"), Duration::zero()).lock_token().unwrap();

        let removed = table.remove(token).expect("entry present");
        assert!(removed.is_expired());
        assert!(table.remove(token).is_none());
    }

    #[test]
    fn test_expired_tokens_lists_only_expired_entries() {
        let mut table = LockTable::new();
        let expired = table.lock(envelope("a"), Duration::zero()).lock_token().unwrap();
        let _live = table.lock(envelope("b"), Duration::minutes(5));

        assert_eq!(table.expired_tokens(), vec![expired]);
    }
}
