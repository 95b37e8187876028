//! Recursive-descent parser producing the expression tree.

use crate::error::CompileError;
use crate::value::DbValue;

use super::lexer::{Lexer, Token, TokenKind};

/// Binary operators, loosest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `or`
    Or,
    /// `and`
    And,
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `||`
    Concat,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `not`
    Not,
    /// `-`
    Negate,
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Identity; wraps trigger conditions.
    Evaluate,
    /// Absolute value.
    Abs,
    /// Upper-case a string.
    Upper,
    /// Lower-case a string.
    Lower,
    /// String length in characters.
    Length,
    /// First non-NULL argument.
    Coalesce,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "evaluate" => Self::Evaluate,
            "abs" => Self::Abs,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "length" => Self::Length,
            "coalesce" => Self::Coalesce,
            _ => return None,
        };
        Some(f)
    }

    /// Accepted argument count: `(min, max)`.
    const fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Coalesce => (1, None),
            _ => (1, Some(1)),
        }
    }
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(DbValue),
    /// Correlation name, optionally dereferenced.
    Path {
        /// Correlation name.
        name: String,
        /// Attribute after the dot.
        attribute: Option<String>,
    },
    /// Prefix operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Infix operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `expr is [not] null`.
    IsNull {
        /// Tested expression.
        expr: Box<Expr>,
        /// `is not null`.
        negated: bool,
    },
    /// Function call.
    Call {
        /// Called function.
        func: Function,
        /// Arguments in order.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Visit every node depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        match self {
            Self::Literal(_) | Self::Path { .. } => {}
            Self::Unary { expr, .. } | Self::IsNull { expr, .. } => expr.walk(visit),
            Self::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Self::Call { args, .. } => args.iter().for_each(|a| a.walk(visit)),
        }
    }
}

const RESERVED: [&str; 7] = ["and", "or", "not", "is", "null", "true", "false"];

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, position: 0 };
    let expr = parser.parse_or_expression()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error_at(trailing, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof, and the parser never
        // advances past it.
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        self.peek().is_keyword(kw)
    }

    fn error_at(&self, token: &Token, message: &str) -> CompileError {
        let found = match &token.kind {
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        };
        CompileError::Syntax {
            line: token.line,
            column: token.column,
            message: format!("{message}, found {found}"),
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), CompileError> {
        if &self.peek().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at(self.peek(), &format!("expected {what}")))
        }
    }

    fn parse_or_expression(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and_expression()?;
        while self.peek_keyword("or") {
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expr::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_not_expression()?;
        while self.peek_keyword("and") {
            self.advance();
            let right = self.parse_not_expression()?;
            left = Expr::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> Result<Expr, CompileError> {
        if self.peek_keyword("not") {
            self.advance();
            let expr = self.parse_not_expression()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr) });
        }
        self.parse_comparison_expression()
    }

    /// Comparisons and `IS [NOT] NULL`; non-associative.
    fn parse_comparison_expression(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_additive_expression()?;

        if self.peek_keyword("is") {
            self.advance();
            let negated = if self.peek_keyword("not") {
                self.advance();
                true
            } else {
                false
            };
            if !self.peek_keyword("null") {
                return Err(self.error_at(self.peek(), "expected NULL after IS"));
            }
            self.advance();
            return Ok(Expr::IsNull { expr: Box::new(left), negated });
        }

        let op = match self.peek().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::LtEq => BinaryOp::LtEq,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::GtEq => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive_expression()?;
        Ok(Expr::Binary { op, left: Box::new(left), right: Box::new(right) })
    }

    fn parse_additive_expression(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Plus,
                TokenKind::Minus => BinaryOp::Minus,
                TokenKind::Concat => BinaryOp::Concat,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative_expression()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary_expression()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary_expression()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> Result<Expr, CompileError> {
        match self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                let expr = self.parse_unary_expression()?;
                Ok(Expr::Unary { op: UnaryOp::Negate, expr: Box::new(expr) })
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_unary_expression()
            }
            _ => self.parse_primary_expression(),
        }
    }

    fn parse_primary_expression(&mut self) -> Result<Expr, CompileError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Integer(v) => Ok(Expr::Literal(DbValue::Int(v))),
            TokenKind::Decimal(v) => Ok(Expr::Literal(DbValue::Double(v))),
            TokenKind::String(s) => Ok(Expr::Literal(DbValue::String(s))),
            TokenKind::LParen => {
                let expr = self.parse_or_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Ident { ref name, quoted } => {
                if !quoted {
                    match name.to_ascii_lowercase().as_str() {
                        "null" => return Ok(Expr::Literal(DbValue::Null)),
                        "true" => return Ok(Expr::Literal(DbValue::Bool(true))),
                        "false" => return Ok(Expr::Literal(DbValue::Bool(false))),
                        kw if RESERVED.contains(&kw) => {
                            return Err(self.error_at(&token, "expected an expression"))
                        }
                        _ => {}
                    }
                }
                if !quoted && self.peek().kind == TokenKind::LParen {
                    return self.parse_call(&token, name);
                }
                self.parse_path(name.clone())
            }
            _ => Err(self.error_at(&token, "expected an expression")),
        }
    }

    fn parse_path(&mut self, name: String) -> Result<Expr, CompileError> {
        if self.peek().kind != TokenKind::Dot {
            return Ok(Expr::Path { name, attribute: None });
        }
        self.advance();
        let token = self.advance();
        match token.kind {
            TokenKind::Ident { name: attribute, .. } => Ok(Expr::Path { name, attribute: Some(attribute) }),
            _ => Err(self.error_at(&token, "expected attribute name after '.'")),
        }
    }

    fn parse_call(&mut self, token: &Token, name: &str) -> Result<Expr, CompileError> {
        let Some(func) = Function::lookup(name) else {
            return Err(CompileError::Syntax {
                line: token.line,
                column: token.column,
                message: format!("unknown function '{name}'"),
            });
        };
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.parse_or_expression()?);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(CompileError::Syntax {
                line: token.line,
                column: token.column,
                message: format!("wrong number of arguments to '{name}': {}", args.len()),
            });
        }
        Ok(Expr::Call { func, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str, attribute: Option<&str>) -> Expr {
        Expr::Path { name: name.into(), attribute: attribute.map(str::to_string) }
    }

    #[test]
    fn precedence_binds_arithmetic_tighter_than_comparison() {
        let expr = parse("new.qty * 2 + 1 > old.qty AND NOT new.flag").unwrap();
        let Expr::Binary { op: BinaryOp::And, left, right } = expr else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Gt, .. }));
        assert!(matches!(*right, Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn parses_calls_paths_and_is_null() {
        let expr = parse("evaluate (coalesce(new.a, 'x') IS NOT NULL)").unwrap();
        let Expr::Call { func: Function::Evaluate, args } = expr else {
            panic!("expected evaluate call");
        };
        let Expr::IsNull { expr, negated: true } = &args[0] else {
            panic!("expected IS NOT NULL");
        };
        let Expr::Call { func: Function::Coalesce, args } = expr.as_ref() else {
            panic!("expected coalesce");
        };
        assert_eq!(args[0], path("new", Some("a")));
        assert_eq!(parse("obj").unwrap(), path("obj", None));
    }

    #[test]
    fn walk_visits_every_path() {
        let expr = parse("upper(new.name) || old.name = 'X' OR obj IS NULL").unwrap();
        let mut names = Vec::new();
        expr.walk(&mut |e| {
            if let Expr::Path { name, .. } = e {
                names.push(name.clone());
            }
        });
        assert_eq!(names, vec!["new", "old", "obj"]);
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let err = parse("new.qty >").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { line: 1, column: 10, .. }));

        let err = parse("a = 1\n  b").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { line: 2, column: 3, .. }));

        assert!(parse("frobnicate(1)").is_err());
        assert!(parse("abs(1, 2)").is_err());
        assert!(parse("new.").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("a IS 3").is_err());
        assert!(parse("and").is_err());
    }
}
