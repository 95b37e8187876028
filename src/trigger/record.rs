//! Persistent form of a trigger.
//!
//! A trigger is stored by the object store as an ordinary record; this is
//! the field set the core reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClassId, UserId};

use super::event::{ActionTime, ActivityKind, TriggerEvent, TriggerStatus};

/// Persisted condition or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Expression, PRINT, REJECT or INVALIDATE.
    pub kind: ActivityKind,
    /// When it runs.
    pub time: ActionTime,
    /// Source text; absent for REJECT and INVALIDATE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Persisted trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Trigger name.
    pub name: String,
    /// Creator; user triggers run for their owner only.
    pub owner: UserId,
    /// Status.
    pub status: TriggerStatus,
    /// Firing priority.
    pub priority: f64,
    /// Triggering event.
    pub event: TriggerEvent,
    /// Target class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassId>,
    /// Target attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Optional condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ActivityRecord>,
    /// Optional action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActivityRecord>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl TriggerRecord {
    /// Whether this record targets `class`/`attribute` exactly.
    #[must_use]
    pub fn targets(&self, class: ClassId, attribute: Option<&str>) -> bool {
        self.class == Some(class)
            && match (self.attribute.as_deref(), attribute) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TriggerRecord {
        TriggerRecord {
            name: "audit".into(),
            owner: UserId::from_name("dba"),
            status: TriggerStatus::Active,
            priority: 1.5,
            event: TriggerEvent::Update,
            class: Some(ClassId::new()),
            attribute: Some("Status".into()),
            condition: Some(ActivityRecord {
                kind: ActivityKind::Expression,
                time: ActionTime::Before,
                source: Some("new.qty > 0".into()),
            }),
            action: Some(ActivityRecord {
                kind: ActivityKind::Reject,
                time: ActionTime::Before,
                source: None,
            }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn record_json_omits_absent_fields() {
        let mut rec = sample();
        rec.action.as_mut().unwrap().source = None;
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json["action"].get("source").is_none());
        let back: TriggerRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn targets_compares_attribute_case_insensitively() {
        let rec = sample();
        let class = rec.class.unwrap();
        assert!(rec.targets(class, Some("status")));
        assert!(!rec.targets(class, None));
        assert!(!rec.targets(ClassId::new(), Some("status")));
    }
}
