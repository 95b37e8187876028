//! Database values seen by trigger conditions and actions.
//!
//! The trigger core does not own the value representation; it only needs
//! enough of it to bind correlation objects and to coerce a condition result
//! to a boolean.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClassId, ObjectHandle};

/// A scalar or collection value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DbValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 16-bit integer.
    Short(i16),
    /// 64-bit integer.
    Int(i64),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// Fixed-point number: `unscaled * 10^-scale`.
    Numeric {
        /// Digits without the decimal point.
        unscaled: i128,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Amount in a currency.
    Monetary {
        /// Amount.
        amount: f64,
        /// ISO currency code.
        currency: String,
    },
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Character string.
    String(String),
    /// Unordered collection.
    Set(Vec<DbValue>),
    /// Reference to a stored object.
    Object(ObjectHandle),
}

impl DbValue {
    /// NULL?
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for every numeric representation (not monetary).
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Short(_) | Self::Int(_) | Self::Float(_) | Self::Double(_) | Self::Numeric { .. }
        )
    }

    /// String contents, if a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Short(v) => Some(f64::from(*v)),
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::Numeric { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(i32::from(*scale)))
            }
            Self::Monetary { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    /// Referenced object, if an object.
    pub const fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }

    /// Coerce a condition result to a boolean.
    ///
    /// NULL and every zero-valued numeric, monetary or temporal scalar are
    /// false. Temporal zero is the Unix epoch. Strings and collections are
    /// true even when empty.
    #[must_use]
    pub fn coerce_to_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Short(v) => *v != 0,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Double(v) => *v != 0.0,
            Self::Numeric { unscaled, .. } => *unscaled != 0,
            Self::Monetary { amount, .. } => *amount != 0.0,
            Self::Date(d) => *d != epoch_date(),
            Self::Time(t) => *t != NaiveTime::MIN,
            Self::Timestamp(ts) => ts.timestamp() != 0 || ts.timestamp_subsec_nanos() != 0,
            Self::String(_) | Self::Set(_) | Self::Object(_) => true,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Numeric { .. } => "numeric",
            Self::Monetary { .. } => "monetary",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::String(_) => "string",
            Self::Set(_) => "set",
            Self::Object(_) => "object",
        }
    }
}

fn epoch_date() -> NaiveDate {
    // chrono's default date is 1970-01-01
    NaiveDate::default()
}

impl Default for DbValue {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for DbValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Numeric { .. } => write!(f, "{}", self.as_f64().unwrap_or_default()),
            Self::Monetary { amount, currency } => write!(f, "{currency}{amount:.2}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::String(v) => write!(f, "'{v}'"),
            Self::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Self::Object(h) => write!(f, "object:{h}"),
        }
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<ObjectHandle> for DbValue {
    fn from(v: ObjectHandle) -> Self {
        Self::Object(v)
    }
}

/// An object instance bound to a correlation name during firing.
///
/// `handle` is `None` for an object that has no identity yet (the new
/// values of a BEFORE INSERT).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbObject {
    /// Identity, if stored.
    pub handle: Option<ObjectHandle>,
    /// Class of the object.
    pub class: ClassId,
    /// Attribute values by lowercased name.
    pub attributes: BTreeMap<String, DbValue>,
}

impl DbObject {
    /// A persisted object with an identity.
    #[must_use]
    pub fn new(handle: ObjectHandle, class: ClassId) -> Self {
        Self {
            handle: Some(handle),
            class,
            attributes: BTreeMap::new(),
        }
    }

    /// A temporary object (new values not yet stored).
    #[must_use]
    pub fn temporary(class: ClassId) -> Self {
        Self {
            handle: None,
            class,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attribute lookup; attribute names compare case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&DbValue> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }
}
