//! Status conditions of a SearchCluster

use chrono::Utc;

use crate::crd::Condition;

/// All node sets run their declared revision and the Service has endpoints
pub const CONDITION_TYPE_READY: &str = "Ready";
/// Some node set has a template change that has not rolled out yet
pub const CONDITION_TYPE_APPLYING_CHANGES: &str = "ApplyingChanges";
/// The external Service has at least one ready endpoint
pub const CONDITION_TYPE_SERVICE_READY: &str = "ServiceReady";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Build a condition stamped with the current time
pub fn new_condition(type_: &str, status: bool, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status {
            CONDITION_STATUS_TRUE
        } else {
            CONDITION_STATUS_FALSE
        }
        .to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: None,
    }
}

/// Insert `condition`, replacing any condition of the same type.
///
/// The previous transition time is kept when the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}
