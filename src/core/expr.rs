/// The deferred expression sub-language behind `Evaluable` placeholders.
///
/// Syntax:
/// - numbers: `3`, `0.5`, `-2`
/// - names: `carrier_count`, dotted paths `constants.high`
/// - arithmetic: `+ - * /` with the usual precedence, parentheses
/// - calls: `normal(50, 10)`, `round(uniform(3, 8))`
/// - list literals: `choice(["slow", "fast"])`
/// - string literals: `"slow"`
///
/// `Quoted` placeholders never pass through here — they are opaque text
/// for the downstream simulation engine.
use rand::rngs::StdRng;
use thiserror::Error;

use crate::core::distributions::{DistributionError, DistributionRegistry};
use crate::core::scope::{Scope, ScopeError};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("expression parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Unresolved(#[from] ScopeError),
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error("expression '{expr}' depends on unbound parameter '{name}'")]
    DependsOnUnbound { expr: String, name: String },
    #[error("type error in expression: {0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Int(i64),
    Str(String),
    Name(String),
    List(Vec<Expr>),
    Call { name: String, args: Vec<Expr> },
    Neg(Box<Expr>),
    BinOp { op: Op, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parse an expression source string into an AST.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        input,
    };
    let expr = parser.expr()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(ExprError::Parse(format!(
            "trailing input at offset {} in '{}'",
            parser.pos, input
        )));
    }
    Ok(expr)
}

/// Evaluate an `Evaluable` source string against a binding scope.
///
/// Distribution calls draw from `rng`; other names resolve through the
/// scope chain. A name that resolves to another `Evaluable` yields
/// `DependsOnUnbound`, which the parameter binder uses for ordering.
pub fn eval_source(
    source: &str,
    scope: &Scope,
    distributions: &DistributionRegistry,
    rng: &mut StdRng,
) -> Result<Value, ExprError> {
    let ast = parse(source)?;
    eval(&ast, source, scope, distributions, rng)
}

fn eval(
    expr: &Expr,
    source: &str,
    scope: &Scope,
    distributions: &DistributionRegistry,
    rng: &mut StdRng,
) -> Result<Value, ExprError> {
    match expr {
        Expr::Num(f) => Ok(Value::Float(*f)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Name(name) => {
            let value = scope.get_path(name)?;
            match value {
                Value::Evaluable(_) => Err(ExprError::DependsOnUnbound {
                    expr: source.to_string(),
                    name: name.clone(),
                }),
                other => Ok(other.clone()),
            }
        }
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, source, scope, distributions, rng)?);
            }
            Ok(Value::Seq(out))
        }
        Expr::Neg(inner) => {
            let v = eval(inner, source, scope, distributions, rng)?;
            match v {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(ExprError::Type(format!("cannot negate {:?}", other))),
            }
        }
        Expr::Call { name, args } => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, source, scope, distributions, rng)?);
            }
            if distributions.contains(name) {
                return Ok(distributions.sample(name, &evaluated, rng)?);
            }
            eval_builtin(name, &evaluated)
        }
        Expr::BinOp { op, lhs, rhs } => {
            let l = eval(lhs, source, scope, distributions, rng)?;
            let r = eval(rhs, source, scope, distributions, rng)?;
            numeric_binop(*op, &l, &r)
        }
    }
}

/// Non-distribution builtins available in expressions.
fn eval_builtin(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let unary = |args: &[Value]| -> Result<f64, ExprError> {
        if args.len() != 1 {
            return Err(ExprError::Type(format!(
                "{}() expects 1 argument, got {}",
                name,
                args.len()
            )));
        }
        args[0]
            .as_f64()
            .ok_or_else(|| ExprError::Type(format!("{}() expects a number", name)))
    };
    match name {
        "round" => Ok(Value::Int(unary(args)?.round() as i64)),
        "floor" => Ok(Value::Int(unary(args)?.floor() as i64)),
        "ceil" => Ok(Value::Int(unary(args)?.ceil() as i64)),
        "abs" => Ok(Value::Float(unary(args)?.abs())),
        "min" | "max" => {
            if args.len() != 2 {
                return Err(ExprError::Type(format!(
                    "{}() expects 2 arguments, got {}",
                    name,
                    args.len()
                )));
            }
            let a = args[0]
                .as_f64()
                .ok_or_else(|| ExprError::Type(format!("{}() expects numbers", name)))?;
            let b = args[1]
                .as_f64()
                .ok_or_else(|| ExprError::Type(format!("{}() expects numbers", name)))?;
            let out = if name == "min" { a.min(b) } else { a.max(b) };
            Ok(Value::Float(out))
        }
        _ => Err(ExprError::Type(format!("unknown function '{}'", name))),
    }
}

fn numeric_binop(op: Op, l: &Value, r: &Value) -> Result<Value, ExprError> {
    // Integer arithmetic stays integral except for division.
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        match op {
            Op::Add => return Ok(Value::Int(a + b)),
            Op::Sub => return Ok(Value::Int(a - b)),
            Op::Mul => return Ok(Value::Int(a * b)),
            Op::Div => {}
        }
    }
    let a = l
        .as_f64()
        .ok_or_else(|| ExprError::Type(format!("non-numeric operand {:?}", l)))?;
    let b = r
        .as_f64()
        .ok_or_else(|| ExprError::Type(format!("non-numeric operand {:?}", r)))?;
    let out = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => {
            if b == 0.0 {
                return Err(ExprError::Type("division by zero".to_string()));
            }
            a / b
        }
    };
    Ok(Value::Float(out))
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, c: char) -> Result<(), ExprError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected '{}' at offset {} in '{}'",
                c, self.pos, self.input
            )))
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(c) = self.peek() {
            let op = match c {
                '+' => Op::Add,
                '-' => Op::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        while let Some(c) = self.peek() {
            let op = match c {
                '*' => Op::Mul,
                '/' => Op::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.factor()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some('[') => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.peek() != Some(']') {
                    loop {
                        items.push(self.expr()?);
                        match self.peek() {
                            Some(',') => {
                                self.pos += 1;
                                // Trailing comma before close.
                                if self.peek() == Some(']') {
                                    break;
                                }
                            }
                            _ => break,
                        }
                    }
                }
                self.expect(']')?;
                Ok(Expr::List(items))
            }
            Some('"') => self.string_literal(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.name_or_call(),
            Some(c) => Err(ExprError::Parse(format!(
                "unexpected '{}' at offset {} in '{}'",
                c, self.pos, self.input
            ))),
            None => Err(ExprError::Parse(format!(
                "unexpected end of expression '{}'",
                self.input
            ))),
        }
    }

    fn string_literal(&mut self) -> Result<Expr, ExprError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Expr::Str(out)),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(ExprError::Parse(format!(
            "unterminated string in '{}'",
            self.input
        )))
    }

    fn number(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(&c) = self.chars.get(self.pos) {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(Expr::Num)
                .map_err(|_| ExprError::Parse(format!("bad number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Expr::Int)
                .map_err(|_| ExprError::Parse(format!("bad number '{}'", text)))
        }
    }

    fn name_or_call(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        while let Some(&c) = self.chars.get(self.pos) {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if self.peek() == Some('(') {
            self.pos += 1;
            let mut args = Vec::new();
            if self.peek() != Some(')') {
                loop {
                    args.push(self.expr()?);
                    if self.peek() == Some(',') {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            self.expect(')')?;
            Ok(Expr::Call { name, args })
        } else {
            Ok(Expr::Name(name))
        }
    }
}
