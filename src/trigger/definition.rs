//! Trigger definition builder.
//!
//! The builder collects the user-supplied parts of a CREATE TRIGGER and
//! validates everything that can be checked without the catalog or the
//! authorizer. The engine performs the remaining checks at creation time.

use crate::error::DefinitionError;
use crate::ids::ClassId;

use super::event::{ActionTime, ActivityKind, TriggerEvent, TriggerStatus};
use super::record::ActivityRecord;

/// Maximum length of a trigger name.
pub const MAX_TRIGGER_NAME_LEN: usize = 254;

/// A validated request to create a trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDefinition {
    /// Unique trigger name.
    pub name: String,
    /// Initial status; ACTIVE unless set.
    pub status: TriggerStatus,
    /// Firing priority; higher fires first.
    pub priority: f64,
    /// Triggering event.
    pub event: TriggerEvent,
    /// Target class for class and attribute triggers.
    pub class: Option<ClassId>,
    /// Target attribute for attribute triggers.
    pub attribute: Option<String>,
    /// Optional condition.
    pub condition: Option<ActivityRecord>,
    /// Optional action.
    pub action: Option<ActivityRecord>,
}

impl TriggerDefinition {
    /// Start building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TriggerBuilder {
        TriggerBuilder::new(name)
    }

    /// Check every rule that does not need the catalog or the authorizer.
    ///
    /// # Errors
    /// The first rule the definition violates.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if name.len() > MAX_TRIGGER_NAME_LEN {
            return Err(DefinitionError::NameTooLong {
                name: name.to_string(),
                max_length: MAX_TRIGGER_NAME_LEN,
            });
        }

        if self.status == TriggerStatus::Invalid {
            return Err(DefinitionError::InvalidStatus { status: self.status });
        }

        validate_priority(self.priority)?;
        self.validate_target()?;

        if let Some(cond) = &self.condition {
            if cond.kind != ActivityKind::Expression {
                return Err(DefinitionError::ConditionNotExpression { kind: cond.kind });
            }
            self.validate_activity("condition", cond)?;
        }

        if let Some(action) = &self.action {
            self.validate_activity("action", action)?;
            self.validate_action_kind(action)?;
            if let Some(cond) = &self.condition {
                if action.time < cond.time {
                    return Err(DefinitionError::TimeOrder {
                        condition: cond.time,
                        action: action.time,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_target(&self) -> Result<(), DefinitionError> {
        let event = self.event;
        if !event.is_creatable() {
            return Err(DefinitionError::InvalidTarget {
                event,
                reason: "event cannot be used in a trigger definition".to_string(),
            });
        }
        if event.is_user_event() {
            if self.class.is_some() || self.attribute.is_some() {
                return Err(DefinitionError::InvalidTarget {
                    event,
                    reason: "user events cannot target a class".to_string(),
                });
            }
            return Ok(());
        }
        if self.class.is_none() {
            return Err(DefinitionError::InvalidTarget {
                event,
                reason: "a target class is required".to_string(),
            });
        }
        if self.attribute.is_some() && !event.allows_attribute() {
            return Err(DefinitionError::InvalidTarget {
                event,
                reason: "only UPDATE events can target an attribute".to_string(),
            });
        }
        Ok(())
    }

    fn validate_activity(&self, what: &str, activity: &ActivityRecord) -> Result<(), DefinitionError> {
        if self.event.is_user_event() && activity.time == ActionTime::Deferred {
            return Err(DefinitionError::InvalidTime {
                event: self.event,
                time: activity.time,
            });
        }
        if activity.kind.has_source()
            && activity.source.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            return Err(DefinitionError::MissingSource {
                activity: format!("{what} ({})", activity.kind),
            });
        }
        Ok(())
    }

    fn validate_action_kind(&self, action: &ActivityRecord) -> Result<(), DefinitionError> {
        match action.kind {
            ActivityKind::Reject => {
                if action.time != ActionTime::Before {
                    return Err(DefinitionError::RejectNotAllowed {
                        reason: format!("REJECT must run BEFORE the event, not {}", action.time),
                    });
                }
                if matches!(self.event, TriggerEvent::Abort | TriggerEvent::Timeout) {
                    return Err(DefinitionError::RejectNotAllowed {
                        reason: format!("{} cannot be rejected", self.event),
                    });
                }
            }
            ActivityKind::Invalidate => {
                if matches!(self.event, TriggerEvent::Abort | TriggerEvent::Timeout) {
                    return Err(DefinitionError::InvalidateNotAllowed { event: self.event });
                }
            }
            ActivityKind::Expression | ActivityKind::Print => {}
        }
        Ok(())
    }
}

/// Priorities are finite and non-negative.
///
/// # Errors
/// `InvalidPriority` otherwise.
pub fn validate_priority(priority: f64) -> Result<(), DefinitionError> {
    if priority.is_finite() && priority >= 0.0 {
        Ok(())
    } else {
        Err(DefinitionError::InvalidPriority { value: priority })
    }
}

/// Builder for [`TriggerDefinition`].
///
/// # Example
/// ```rust,ignore
/// let def = TriggerDefinition::builder("order_audit")
///     .event(TriggerEvent::Update)
///     .class(orders)
///     .attribute("status")
///     .condition(ActionTime::Before, "new.status <> old.status")
///     .action(ActivityKind::Print, ActionTime::After, "status changed")
///     .priority(10.0)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct TriggerBuilder {
    name: String,
    status: TriggerStatus,
    priority: f64,
    event: Option<TriggerEvent>,
    class: Option<ClassId>,
    attribute: Option<String>,
    condition: Option<ActivityRecord>,
    action: Option<ActivityRecord>,
}

impl TriggerBuilder {
    /// New builder; status defaults to ACTIVE and priority to 0.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TriggerStatus::Active,
            priority: 0.0,
            event: None,
            class: None,
            attribute: None,
            condition: None,
            action: None,
        }
    }

    /// Set the triggering event.
    #[must_use]
    pub fn event(mut self, event: TriggerEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Target a class.
    #[must_use]
    pub fn class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    /// Narrow the target to one attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Initial status.
    #[must_use]
    pub fn status(mut self, status: TriggerStatus) -> Self {
        self.status = status;
        self
    }

    /// Firing priority.
    #[must_use]
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Condition expression evaluated at `time`.
    #[must_use]
    pub fn condition(mut self, time: ActionTime, source: impl Into<String>) -> Self {
        self.condition = Some(ActivityRecord {
            kind: ActivityKind::Expression,
            time,
            source: Some(source.into()),
        });
        self
    }

    /// Action with source text (EXPRESSION or PRINT).
    #[must_use]
    pub fn action(mut self, kind: ActivityKind, time: ActionTime, source: impl Into<String>) -> Self {
        self.action = Some(ActivityRecord {
            kind,
            time,
            source: Some(source.into()),
        });
        self
    }

    /// REJECT action.
    #[must_use]
    pub fn reject(mut self, time: ActionTime) -> Self {
        self.action = Some(ActivityRecord {
            kind: ActivityKind::Reject,
            time,
            source: None,
        });
        self
    }

    /// INVALIDATE TRANSACTION action.
    #[must_use]
    pub fn invalidate(mut self, time: ActionTime) -> Self {
        self.action = Some(ActivityRecord {
            kind: ActivityKind::Invalidate,
            time,
            source: None,
        });
        self
    }

    /// Build and validate.
    ///
    /// # Errors
    /// `InvalidTarget` if no event was set, or any rule from
    /// [`TriggerDefinition::validate`].
    pub fn build(self) -> Result<TriggerDefinition, DefinitionError> {
        let event = self.event.ok_or(DefinitionError::InvalidTarget {
            event: TriggerEvent::Null,
            reason: "an event is required".to_string(),
        })?;
        let def = TriggerDefinition {
            name: self.name.trim().to_string(),
            status: self.status,
            priority: self.priority,
            event,
            class: self.class,
            attribute: self.attribute,
            condition: self.condition,
            action: self.action,
        };
        def.validate()?;
        Ok(def)
    }
}
