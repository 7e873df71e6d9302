use crate::models::ActionType;

const MAX_BACKOFF_EXPONENT: u32 = 6;

pub(crate) fn should_retry_operation(attempt: u32, max_attempts: u32) -> bool {
    attempt < max_attempts
}

/// Capped exponential backoff with deterministic jitter, so two workers
/// computing the delay for the same entry agree on it.
pub(crate) fn retry_backoff_seconds(action: ActionType, attempt: u32, operation_id: &str) -> i64 {
    let capped_exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let base = 1_i64 << capped_exp;
    let max = match action {
        ActionType::Duplicate | ActionType::DeleteCompletely => 120,
        ActionType::Rename | ActionType::Delete | ActionType::Revert => 30,
    };
    let baseline = base.min(max);
    let jitter_bound = (baseline / 4).max(1);
    let jitter_seed = format!("{}:{attempt}:{operation_id}", action.as_str());
    let hash = blake3::hash(jitter_seed.as_bytes());
    let bytes = hash.as_bytes();
    let rand = i64::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    let jitter = rand % (jitter_bound + 1);
    (baseline + jitter).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_stops_at_configured_cap() {
        assert!(should_retry_operation(1, 3));
        assert!(should_retry_operation(2, 3));
        assert!(!should_retry_operation(3, 3));
        assert!(!should_retry_operation(1, 1));
    }

    #[test]
    fn retry_backoff_seconds_is_deterministic_and_bounded() {
        let a = retry_backoff_seconds(ActionType::Duplicate, 3, "op-1");
        let b = retry_backoff_seconds(ActionType::Duplicate, 3, "op-1");
        assert_eq!(a, b);
        assert!(a >= 4);
        assert!(a <= 120);

        for attempt in 1..20 {
            let delay = retry_backoff_seconds(ActionType::Rename, attempt, "op-2");
            assert!((1..=30).contains(&delay));
        }
    }
}
