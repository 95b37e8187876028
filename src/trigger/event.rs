//! Closed tag sets describing when and how a trigger runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Data-modification or transaction event a trigger is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Object inserted.
    Insert,
    /// Object updated.
    Update,
    /// Object deleted.
    Delete,
    /// INSERT statement.
    StatementInsert,
    /// UPDATE statement.
    StatementUpdate,
    /// DELETE statement.
    StatementDelete,
    /// Class altered.
    Alter,
    /// Class dropped.
    Drop,
    /// Transaction commit.
    Commit,
    /// Transaction rollback.
    Rollback,
    /// Transaction abort.
    Abort,
    /// Lock timeout.
    Timeout,
    /// No event; never creatable.
    Null,
    /// Lookup wildcard matching every event; never creatable.
    All,
}

impl TriggerEvent {
    /// Every event a trigger can actually be created for.
    pub const CREATABLE: [Self; 12] = [
        Self::Insert,
        Self::Update,
        Self::Delete,
        Self::StatementInsert,
        Self::StatementUpdate,
        Self::StatementDelete,
        Self::Alter,
        Self::Drop,
        Self::Commit,
        Self::Rollback,
        Self::Abort,
        Self::Timeout,
    ];

    /// Events that target a class (optionally an attribute).
    #[must_use]
    pub const fn is_class_event(self) -> bool {
        matches!(
            self,
            Self::Insert
                | Self::Update
                | Self::Delete
                | Self::StatementInsert
                | Self::StatementUpdate
                | Self::StatementDelete
                | Self::Alter
                | Self::Drop
        )
    }

    /// Transaction events rooted on a user instead of a class.
    #[must_use]
    pub const fn is_user_event(self) -> bool {
        matches!(self, Self::Commit | Self::Rollback | Self::Abort | Self::Timeout)
    }

    /// Statement-level events, which absorb self-recursion instead of failing.
    #[must_use]
    pub const fn is_statement_event(self) -> bool {
        matches!(
            self,
            Self::StatementInsert | Self::StatementUpdate | Self::StatementDelete
        )
    }

    /// Whether a trigger for this event may name a target attribute.
    #[must_use]
    pub const fn allows_attribute(self) -> bool {
        matches!(self, Self::Update | Self::StatementUpdate)
    }

    /// Whether the event can be used in a trigger definition.
    #[must_use]
    pub const fn is_creatable(self) -> bool {
        !matches!(self, Self::Null | Self::All)
    }

    /// Keyword form used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::StatementInsert => "STATEMENT INSERT",
            Self::StatementUpdate => "STATEMENT UPDATE",
            Self::StatementDelete => "STATEMENT DELETE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Abort => "ABORT",
            Self::Timeout => "TIMEOUT",
            Self::Null => "NULL",
            Self::All => "ALL",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When an activity runs relative to its event.
///
/// Ordered: `Before < After < Deferred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTime {
    /// Before the operation.
    Before,
    /// After the operation.
    After,
    /// At commit.
    Deferred,
}

impl ActionTime {
    /// Upper-case name, as in the definition language.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
            Self::Deferred => "DEFERRED",
        }
    }
}

impl fmt::Display for ActionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Target vanished or revalidation failed; only the owner may act on it.
    Invalid,
    /// Fires.
    Active,
    /// Kept but does not fire.
    Inactive,
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invalid => "INVALID",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        })
    }
}

/// What an activity does when it runs.
///
/// Conditions are always [`ActivityKind::Expression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Compile and evaluate the source text.
    Expression,
    /// Refuse the triggering operation.
    Reject,
    /// Mark the transaction as uncommittable.
    Invalidate,
    /// Write the source text to the output sink.
    Print,
}

impl ActivityKind {
    /// Kinds whose source text is compiled before use.
    #[must_use]
    pub const fn is_compiled(self) -> bool {
        matches!(self, Self::Expression)
    }

    /// Kinds that carry source text at all.
    #[must_use]
    pub const fn has_source(self) -> bool {
        matches!(self, Self::Expression | Self::Print)
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expression => "EXPRESSION",
            Self::Reject => "REJECT",
            Self::Invalidate => "INVALIDATE",
            Self::Print => "PRINT",
        })
    }
}
