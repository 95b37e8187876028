//! Tree-walking evaluator.

use std::cmp::Ordering;

use crate::error::{ExecutionError, TriggerResult};
use crate::host::ActivationFrame;
use crate::value::DbValue;

use super::parser::{BinaryOp, Expr, Function, UnaryOp};

fn fail<T>(message: impl Into<String>) -> TriggerResult<T> {
    Err(ExecutionError::Expression {
        message: message.into(),
    }
    .into())
}

/// Three-valued truth: `None` is unknown.
fn truth(v: &DbValue) -> Option<bool> {
    if v.is_null() {
        None
    } else {
        Some(v.coerce_to_bool())
    }
}

fn from_truth(t: Option<bool>) -> DbValue {
    t.map_or(DbValue::Null, DbValue::Bool)
}

fn as_int(v: &DbValue) -> Option<i64> {
    match v {
        DbValue::Short(s) => Some(i64::from(*s)),
        DbValue::Int(i) => Some(*i),
        _ => None,
    }
}

fn text(v: &DbValue) -> String {
    match v {
        DbValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate `expr` against the objects bound in `frame`.
pub fn evaluate(expr: &Expr, frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path { name, attribute } => resolve_path(name, attribute.as_deref(), frame),
        Expr::Unary { op, expr } => {
            let v = evaluate(expr, frame)?;
            match op {
                UnaryOp::Not => Ok(from_truth(truth(&v).map(|b| !b))),
                UnaryOp::Negate => negate(&v),
            }
        }
        Expr::IsNull { expr, negated } => {
            let v = evaluate(expr, frame)?;
            Ok(DbValue::Bool(v.is_null() != *negated))
        }
        Expr::Binary { op: BinaryOp::And, left, right } => {
            let l = truth(&evaluate(left, frame)?);
            if l == Some(false) {
                return Ok(DbValue::Bool(false));
            }
            let r = truth(&evaluate(right, frame)?);
            Ok(from_truth(match (l, r) {
                (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }))
        }
        Expr::Binary { op: BinaryOp::Or, left, right } => {
            let l = truth(&evaluate(left, frame)?);
            if l == Some(true) {
                return Ok(DbValue::Bool(true));
            }
            let r = truth(&evaluate(right, frame)?);
            Ok(from_truth(match (l, r) {
                (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }))
        }
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, frame)?;
            let r = evaluate(right, frame)?;
            binary(*op, &l, &r)
        }
        Expr::Call { func, args } => call(*func, args, frame),
    }
}

fn resolve_path(name: &str, attribute: Option<&str>, frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
    let Some(object) = frame.lookup(name) else {
        return fail(format!("correlation name '{name}' is not bound"));
    };
    match attribute {
        None => match object.handle {
            Some(h) => Ok(DbValue::Object(h)),
            None => fail(format!("'{name}' has no object identity yet")),
        },
        Some(attr) => match object.attribute(attr) {
            Some(v) => Ok(v.clone()),
            None => fail(format!("'{name}' has no attribute '{attr}'")),
        },
    }
}

fn negate(v: &DbValue) -> TriggerResult<DbValue> {
    match v {
        DbValue::Null => Ok(DbValue::Null),
        DbValue::Short(s) => Ok(DbValue::Int(-i64::from(*s))),
        DbValue::Int(i) => match i.checked_neg() {
            Some(n) => Ok(DbValue::Int(n)),
            None => fail("integer overflow"),
        },
        other => match other.as_f64() {
            Some(f) => Ok(DbValue::Double(-f)),
            None => fail(format!("cannot negate a {}", other.type_name())),
        },
    }
}

fn binary(op: BinaryOp, l: &DbValue, r: &DbValue) -> TriggerResult<DbValue> {
    if l.is_null() || r.is_null() {
        return Ok(DbValue::Null);
    }
    match op {
        BinaryOp::Concat => Ok(DbValue::String(format!("{}{}", text(l), text(r)))),
        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
            arithmetic(op, l, r)
        }
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ord = compare(l, r)?;
            let b = match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::NotEq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(DbValue::Bool(b))
        }
        BinaryOp::And | BinaryOp::Or => fail("logical operator evaluated as arithmetic"),
    }
}

fn arithmetic(op: BinaryOp, l: &DbValue, r: &DbValue) -> TriggerResult<DbValue> {
    if let (Some(a), Some(b)) = (as_int(l), as_int(r)) {
        let out = match op {
            BinaryOp::Plus => a.checked_add(b),
            BinaryOp::Minus => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide | BinaryOp::Modulo if b == 0 => return fail("division by zero"),
            BinaryOp::Divide => a.checked_div(b),
            _ => a.checked_rem(b),
        };
        return match out {
            Some(v) => Ok(DbValue::Int(v)),
            None => fail("integer overflow"),
        };
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return fail(format!("cannot apply arithmetic to {} and {}", l.type_name(), r.type_name()));
    };
    let out = match op {
        BinaryOp::Plus => a + b,
        BinaryOp::Minus => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide | BinaryOp::Modulo if b == 0.0 => return fail("division by zero"),
        BinaryOp::Divide => a / b,
        _ => a % b,
    };
    Ok(DbValue::Double(out))
}

fn compare(l: &DbValue, r: &DbValue) -> TriggerResult<Ordering> {
    if let (Some(a), Some(b)) = (as_int(l), as_int(r)) {
        return Ok(a.cmp(&b));
    }
    let ord = match (l, r) {
        (DbValue::String(a), DbValue::String(b)) => Some(a.cmp(b)),
        (DbValue::Bool(a), DbValue::Bool(b)) => Some(a.cmp(b)),
        (DbValue::Date(a), DbValue::Date(b)) => Some(a.cmp(b)),
        (DbValue::Time(a), DbValue::Time(b)) => Some(a.cmp(b)),
        (DbValue::Timestamp(a), DbValue::Timestamp(b)) => Some(a.cmp(b)),
        (DbValue::Object(a), DbValue::Object(b)) => Some(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    match ord {
        Some(o) => Ok(o),
        None => fail(format!("cannot compare {} with {}", l.type_name(), r.type_name())),
    }
}

fn call(func: Function, args: &[Expr], frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
    if func == Function::Coalesce {
        for arg in args {
            let v = evaluate(arg, frame)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        return Ok(DbValue::Null);
    }

    let Some(arg) = args.first() else {
        return fail("missing function argument");
    };
    let v = evaluate(arg, frame)?;
    if v.is_null() {
        return Ok(DbValue::Null);
    }
    match func {
        Function::Evaluate | Function::Coalesce => Ok(v),
        Function::Abs => match v {
            DbValue::Short(s) => Ok(DbValue::Int(i64::from(s).abs())),
            DbValue::Int(i) => match i.checked_abs() {
                Some(a) => Ok(DbValue::Int(a)),
                None => fail("integer overflow"),
            },
            other => match other.as_f64() {
                Some(f) => Ok(DbValue::Double(f.abs())),
                None => fail(format!("abs() of a {}", other.type_name())),
            },
        },
        Function::Upper => Ok(DbValue::String(text(&v).to_uppercase())),
        Function::Lower => Ok(DbValue::String(text(&v).to_lowercase())),
        Function::Length => {
            let n = match &v {
                DbValue::Set(items) => items.len(),
                other => text(other).chars().count(),
            };
            i64::try_from(n).map_or_else(|_| fail("length overflow"), |n| Ok(DbValue::Int(n)))
        }
    }
}
