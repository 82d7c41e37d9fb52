//! Provider condition bookkeeping

use chrono::{DateTime, Utc};
use ec2_actuator_models::{ConditionStatus, ConditionType, ProviderCondition};

/// When an existing condition whose status did not change gets rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    Always,
    Never,
    OnReasonOrMessageChange,
}

impl UpdatePolicy {
    fn allows(&self, existing: &ProviderCondition, reason: &str, message: &str) -> bool {
        match self {
            UpdatePolicy::Always => true,
            UpdatePolicy::Never => false,
            UpdatePolicy::OnReasonOrMessageChange => {
                existing.reason != reason || existing.message != message
            }
        }
    }
}

/// Set a condition, stamping times with the current clock
pub fn set_condition(
    conditions: &mut Vec<ProviderCondition>,
    kind: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    policy: UpdatePolicy,
) -> bool {
    set_condition_at(conditions, kind, status, reason, message, policy, Utc::now())
}

/// Set a condition as of `now`. Returns whether anything changed.
///
/// A missing condition is only added when `status` is true. An existing one
/// is rewritten when its status flips, or when `policy` allows; a flip also
/// moves its transition time.
pub fn set_condition_at(
    conditions: &mut Vec<ProviderCondition>,
    kind: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    policy: UpdatePolicy,
    now: DateTime<Utc>,
) -> bool {
    let Some(index) = conditions.iter().position(|c| c.kind == kind) else {
        if status != ConditionStatus::True {
            return false;
        }
        conditions.push(ProviderCondition {
            kind,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_probe_time: now,
            last_transition_time: now,
        });
        return true;
    };

    let existing = &mut conditions[index];
    let flipped = existing.status != status;
    if !flipped && !policy.allows(existing, reason, message) {
        return false;
    }

    if flipped {
        existing.last_transition_time = now;
    }
    existing.status = status;
    existing.reason = reason.to_string();
    existing.message = message.to_string();
    existing.last_probe_time = now;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::at;

    const KIND: ConditionType = ConditionType::MachineCreation;

    #[test]
    fn test_only_true_conditions_are_added() {
        let mut conditions = Vec::new();
        assert!(!set_condition_at(&mut conditions, KIND, ConditionStatus::False, "r", "m", UpdatePolicy::Always, at(0)));
        assert!(conditions.is_empty());

        assert!(set_condition_at(&mut conditions, KIND, ConditionStatus::True, "r", "m", UpdatePolicy::Always, at(0)));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, at(0));
    }

    #[test]
    fn test_unchanged_condition_left_alone_under_reason_policy() {
        let mut conditions = Vec::new();
        set_condition_at(&mut conditions, KIND, ConditionStatus::True, "r", "m", UpdatePolicy::Always, at(0));

        let changed = set_condition_at(
            &mut conditions,
            KIND,
            ConditionStatus::True,
            "r",
            "m",
            UpdatePolicy::OnReasonOrMessageChange,
            at(100),
        );
        assert!(!changed);
        assert_eq!(conditions[0].last_probe_time, at(0));
        assert_eq!(conditions[0].last_transition_time, at(0));

        set_condition_at(
            &mut conditions,
            KIND,
            ConditionStatus::True,
            "r",
            "new message",
            UpdatePolicy::OnReasonOrMessageChange,
            at(200),
        );
        assert_eq!(conditions[0].message, "new message");
        assert_eq!(conditions[0].last_probe_time, at(200));
        assert_eq!(conditions[0].last_transition_time, at(0));
    }

    #[test]
    fn test_status_flip_always_updates() {
        let mut conditions = Vec::new();
        set_condition_at(&mut conditions, KIND, ConditionStatus::True, "r", "m", UpdatePolicy::Always, at(0));

        assert!(set_condition_at(&mut conditions, KIND, ConditionStatus::False, "r", "m", UpdatePolicy::Never, at(50)));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].last_transition_time, at(50));
        assert_eq!(conditions[0].last_probe_time, at(50));

        assert!(!set_condition_at(&mut conditions, KIND, ConditionStatus::False, "x", "y", UpdatePolicy::Never, at(60)));
        assert_eq!(conditions[0].reason, "r");
    }
}
