//! Trigger data model: definitions, activities and their persistent form.

mod activity;
mod definition;
mod event;
mod record;
mod trigger;

pub use activity::Activity;
pub use definition::{validate_priority, TriggerBuilder, TriggerDefinition, MAX_TRIGGER_NAME_LEN};
pub use event::{ActionTime, ActivityKind, TriggerEvent, TriggerStatus};
pub use record::{ActivityRecord, TriggerRecord};
pub use trigger::Trigger;
