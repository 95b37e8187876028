//! Compilation of trigger activities.
//!
//! Decides which correlation names an activity may use, hands the source to
//! the host's expression compiler, and checks the compiled tree for
//! correlation misuse.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::host::{CompiledExpression, ExpressionCompiler};
use crate::trigger::{ActionTime, Activity, TriggerEvent};

/// Name bound to the new values of an INSERT/UPDATE.
pub const NEW_NAME: &str = "new";
/// Name bound to the old values of an UPDATE/DELETE.
pub const OLD_NAME: &str = "old";
/// Legacy single name for the current object.
pub const OBJ_NAME: &str = "obj";

/// Naming convention for correlation objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStyle {
    /// OLD/NEW paired names.
    #[default]
    Paired,
    /// The current object is always called `obj`.
    Legacy,
}

/// Correlation names bound for one activity.
///
/// `current` binds the object the event applies to; `temp` binds the
/// not-yet-stored or pre-image values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorrelationNames {
    /// Name bound to the object the event applies to.
    pub current: Option<&'static str>,
    /// Name bound to the pre-image or not-yet-stored values.
    pub temp: Option<&'static str>,
}

impl CorrelationNames {
    /// Whether `name` is one of the bound names.
    #[must_use]
    pub fn binds(&self, name: &str) -> bool {
        [self.current, self.temp]
            .into_iter()
            .flatten()
            .any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Correlation names applicable to an activity of `event` running at `time`.
#[must_use]
pub fn correlation_names(event: TriggerEvent, time: ActionTime, style: CorrelationStyle) -> CorrelationNames {
    use ActionTime::{After, Before, Deferred};

    let (current, temp) = match (event, time) {
        (TriggerEvent::Insert, Before) => (None, Some(NEW_NAME)),
        (TriggerEvent::Insert, After | Deferred) => (Some(NEW_NAME), None),
        (TriggerEvent::Update, Before) => (Some(OLD_NAME), Some(NEW_NAME)),
        (TriggerEvent::Update, After) => (Some(NEW_NAME), Some(OLD_NAME)),
        (TriggerEvent::Update, Deferred) => (Some(NEW_NAME), None),
        (TriggerEvent::Delete, Before) => (Some(OLD_NAME), None),
        _ => (None, None),
    };

    let current = match style {
        CorrelationStyle::Paired => current,
        CorrelationStyle::Legacy => current.map(|_| OBJ_NAME),
    };

    // Only the first slot is kept when the current name is absent.
    match current {
        Some(_) => CorrelationNames { current, temp },
        None => CorrelationNames {
            current: temp,
            temp: None,
        },
    }
}

/// Wrap condition source so the compiler treats it as a scalar expression.
#[must_use]
pub fn wrap_condition(source: &str) -> String {
    format!("evaluate ({source})")
}

/// Compile one activity of a trigger on `event`.
///
/// # Errors
/// Returns the compiler's error, or `CompileError::Correlation` when a BEFORE
/// INSERT activity references the bare `new` object, which has no identity
/// yet.
pub fn compile_activity(
    event: TriggerEvent,
    activity: &Activity,
    is_condition: bool,
    compiler: &dyn ExpressionCompiler,
    style: CorrelationStyle,
) -> Result<Arc<dyn CompiledExpression>, CompileError> {
    let source = activity.source().unwrap_or_default();
    if source.trim().is_empty() {
        return Err(CompileError::Semantic {
            message: "activity has no source text".to_string(),
        });
    }

    let names = correlation_names(event, activity.time(), style);
    let text = if is_condition {
        wrap_condition(source)
    } else {
        source.to_string()
    };

    let compiled = compiler.compile(&text, &names)?;
    if event == TriggerEvent::Insert && activity.time() == ActionTime::Before {
        check_no_bare_new(compiled.as_ref())?;
    }
    Ok(compiled)
}

fn check_no_bare_new(compiled: &dyn CompiledExpression) -> Result<(), CompileError> {
    let bare = compiled
        .references()
        .into_iter()
        .find(|r| r.attribute.is_none() && r.name.eq_ignore_ascii_case(NEW_NAME));
    match bare {
        Some(r) => Err(CompileError::Correlation {
            name: r.name,
            reason: "the new object has no identity before it is inserted; use new.<attribute>"
                .to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::TriggerResult;
    use crate::host::{ActivationFrame, NameReference};
    use crate::trigger::ActivityKind;
    use crate::value::DbValue;

    #[derive(Debug)]
    struct Refs(Vec<NameReference>);

    impl CompiledExpression for Refs {
        fn references(&self) -> Vec<NameReference> {
            self.0.clone()
        }

        fn execute(&self, _frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
            Ok(DbValue::Null)
        }
    }

    /// Treats the source as a space-separated list of references.
    struct RefCompiler;

    impl ExpressionCompiler for RefCompiler {
        fn compile(
            &self,
            source: &str,
            _names: &CorrelationNames,
        ) -> Result<Arc<dyn CompiledExpression>, CompileError> {
            let refs = source
                .split_whitespace()
                .map(|w| w.trim_matches(|c| c == '(' || c == ')'))
                .filter(|w| !w.is_empty() && *w != "evaluate")
                .map(|w| {
                    match w.split_once('.') {
                        Some((n, a)) => NameReference {
                            name: n.to_string(),
                            attribute: Some(a.to_string()),
                        },
                        None => NameReference {
                            name: w.to_string(),
                            attribute: None,
                        },
                    }
                })
                .collect();
            Ok(Arc::new(Refs(refs)))
        }
    }

    #[test]
    fn before_insert_binds_only_new_in_first_slot() {
        let names = correlation_names(TriggerEvent::Insert, ActionTime::Before, CorrelationStyle::Paired);
        assert_eq!(names.current, Some(NEW_NAME));
        assert_eq!(names.temp, None);
    }

    #[test]
    fn update_binds_both_names() {
        let before = correlation_names(TriggerEvent::Update, ActionTime::Before, CorrelationStyle::Paired);
        assert_eq!((before.current, before.temp), (Some(OLD_NAME), Some(NEW_NAME)));
        let after = correlation_names(TriggerEvent::Update, ActionTime::After, CorrelationStyle::Paired);
        assert_eq!((after.current, after.temp), (Some(NEW_NAME), Some(OLD_NAME)));
    }

    #[test]
    fn delete_after_binds_nothing() {
        let names = correlation_names(TriggerEvent::Delete, ActionTime::After, CorrelationStyle::Paired);
        assert_eq!(names, CorrelationNames::default());
        let names = correlation_names(TriggerEvent::Commit, ActionTime::Before, CorrelationStyle::Paired);
        assert_eq!(names, CorrelationNames::default());
    }

    #[test]
    fn legacy_style_renames_current() {
        let names = correlation_names(TriggerEvent::Update, ActionTime::Before, CorrelationStyle::Legacy);
        assert_eq!((names.current, names.temp), (Some(OBJ_NAME), Some(NEW_NAME)));
        // A promoted temp name is not renamed.
        let names = correlation_names(TriggerEvent::Insert, ActionTime::Before, CorrelationStyle::Legacy);
        assert_eq!(names.current, Some(NEW_NAME));
    }

    #[test]
    fn bare_new_rejected_before_insert() {
        let act = Activity::new(ActivityKind::Expression, ActionTime::Before, Some("new".into()));
        let err = compile_activity(TriggerEvent::Insert, &act, false, &RefCompiler, CorrelationStyle::Paired)
            .unwrap_err();
        assert!(matches!(err, CompileError::Correlation { .. }));

        let ok = Activity::new(ActivityKind::Expression, ActionTime::Before, Some("new.qty".into()));
        assert!(compile_activity(TriggerEvent::Insert, &ok, true, &RefCompiler, CorrelationStyle::Paired).is_ok());

        // Same text is fine after the insert happened.
        let after = Activity::new(ActivityKind::Expression, ActionTime::After, Some("new".into()));
        assert!(compile_activity(TriggerEvent::Insert, &after, false, &RefCompiler, CorrelationStyle::Paired).is_ok());
    }

    #[test]
    fn empty_source_is_a_semantic_error() {
        let act = Activity::new(ActivityKind::Expression, ActionTime::After, Some("  ".into()));
        let err = compile_activity(TriggerEvent::Update, &act, true, &RefCompiler, CorrelationStyle::Paired)
            .unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
    }

    #[test]
    fn conditions_are_wrapped() {
        assert_eq!(wrap_condition("a > 1"), "evaluate (a > 1)");
    }
}
