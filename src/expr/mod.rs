//! Built-in expression language.
//!
//! A small SQL-flavoured expression compiler the engine uses when the host
//! does not supply its own. It covers literals, correlation paths,
//! arithmetic, comparisons, three-valued logic and a handful of scalar
//! functions.

mod eval;
mod lexer;
mod parser;

use std::sync::Arc;

use crate::compile::CorrelationNames;
use crate::error::{CompileError, TriggerResult};
use crate::host::{ActivationFrame, CompiledExpression, ExpressionCompiler, NameReference};
use crate::value::DbValue;

pub use parser::{BinaryOp, Expr, Function, UnaryOp};

/// Parse an expression without checking correlation names.
///
/// # Errors
/// `CompileError::Syntax` with the 1-based position of the offending token.
pub fn parse(source: &str) -> Result<Expr, CompileError> {
    parser::parse(source)
}

/// A parsed, name-checked expression.
#[derive(Debug, Clone)]
pub struct ReferenceExpression {
    source: String,
    tree: Expr,
}

impl ReferenceExpression {
    /// Source text as compiled.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed tree.
    #[must_use]
    pub const fn tree(&self) -> &Expr {
        &self.tree
    }
}

impl CompiledExpression for ReferenceExpression {
    fn references(&self) -> Vec<NameReference> {
        let mut refs = Vec::new();
        self.tree.walk(&mut |e| {
            if let Expr::Path { name, attribute } = e {
                refs.push(NameReference {
                    name: name.clone(),
                    attribute: attribute.clone(),
                });
            }
        });
        refs
    }

    fn execute(&self, frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
        eval::evaluate(&self.tree, frame)
    }
}

/// Default [`ExpressionCompiler`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceCompiler;

impl ReferenceCompiler {
    /// New compiler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ExpressionCompiler for ReferenceCompiler {
    fn compile(
        &self,
        source: &str,
        names: &CorrelationNames,
    ) -> Result<Arc<dyn CompiledExpression>, CompileError> {
        let tree = parser::parse(source)?;
        let compiled = ReferenceExpression {
            source: source.to_string(),
            tree,
        };
        if let Some(unbound) = compiled.references().into_iter().find(|r| !names.binds(&r.name)) {
            return Err(CompileError::Correlation {
                name: unbound.name,
                reason: "not bound for this event and action time".to_string(),
            });
        }
        Ok(Arc::new(compiled))
    }
}
