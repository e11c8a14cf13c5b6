//! Arithmetic, comparison, logical, and coalescing operators.
//!
//! A flat sequence of operand functions and infix operators is resolved into
//! a tree of operator nodes by standard precedence (`* / %` over `+ -` over
//! comparisons over `&&` over `||` over `|`), left-associative within a tier.
//!
//! Numeric operations degrade: integers stay in 64-bit signed arithmetic
//! until a float operand (or a non-integral division) forces the computation
//! to floats. Logical operators short-circuit at runtime but still report the
//! static targets of operands they might skip.

use crate::query::error::QueryError;
use crate::query::function::{Function, FunctionContext, aggregate_targets};
use crate::query::target::{TargetPath, TargetsContext};
use crate::value::{Number, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// An infix operator of the query language.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Pipe,
}

impl Operator {
    /// The verb used in operand-mismatch errors.
    fn verb(self) -> &'static str {
        match self {
            Operator::Add => "add",
            Operator::Sub => "subtract",
            Operator::Mul => "multiply",
            Operator::Div => "divide",
            Operator::Mod => "modulo",
            _ => "operate on",
        }
    }

    /// Precedence tier, highest binding first.
    fn tier(self) -> usize {
        match self {
            Operator::Mul | Operator::Div | Operator::Mod => 0,
            Operator::Add | Operator::Sub => 1,
            Operator::Eq
            | Operator::Neq
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte => 2,
            Operator::And => 3,
            Operator::Or => 4,
            Operator::Pipe => 5,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Eq => "==",
            Operator::Neq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Pipe => "|",
        }
    }
}

/// Resolve a mixed sequence of operands and operators into a single
/// expression node.
pub fn new_arithmetic_expression(
    fns: Vec<Arc<dyn Function>>,
    ops: Vec<Operator>,
) -> Result<Arc<dyn Function>, QueryError> {
    if fns.len() != ops.len() + 1 {
        return Err(QueryError::message(format!(
            "mismatch of functions ({}) to arithmetic operators ({})",
            fns.len(),
            ops.len()
        )));
    }
    let mut fns = fns;
    let mut ops = ops;
    for tier in 0..=5 {
        let mut i = 0;
        while i < ops.len() {
            if ops[i].tier() != tier {
                i += 1;
                continue;
            }
            let op = ops.remove(i);
            let rhs = fns.remove(i + 1);
            let lhs = std::mem::replace(&mut fns[i], Arc::new(Resolved));
            fns[i] = combine(op, lhs, rhs);
        }
    }
    Ok(fns.remove(0))
}

// Placeholder swapped out immediately during resolution.
struct Resolved;

impl Function for Resolved {
    fn exec(&self, _: FunctionContext<'_>) -> Result<Value, QueryError> {
        Err(QueryError::message("unresolved arithmetic operand"))
    }
    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }
    fn annotation(&self) -> String {
        String::new()
    }
}

fn combine(op: Operator, lhs: Arc<dyn Function>, rhs: Arc<dyn Function>) -> Arc<dyn Function> {
    match op {
        Operator::Add | Operator::Sub | Operator::Mul | Operator::Div | Operator::Mod => {
            Arc::new(NumericOp { op, lhs, rhs })
        }
        Operator::Eq | Operator::Neq => Arc::new(Equality {
            negated: op == Operator::Neq,
            lhs,
            rhs,
        }),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            Arc::new(OrderedCompare { op, lhs, rhs })
        }
        Operator::And => Arc::new(LogicalAnd { lhs, rhs }),
        Operator::Or => Arc::new(LogicalOr { lhs, rhs }),
        Operator::Pipe => Arc::new(Coalesce { lhs, rhs }),
    }
}

// Both operands reduced to a shared numeric kind.
enum Degraded {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn degrade(l: Number, r: Number) -> Degraded {
    if l.is_float() || r.is_float() {
        Degraded::Floats(l.as_f64(), r.as_f64())
    } else {
        Degraded::Ints(l.as_i64(), r.as_i64())
    }
}

/// `+ - * / %` with numeric degradation. String concatenation for `+` over
/// two strings.
struct NumericOp {
    op: Operator,
    lhs: Arc<dyn Function>,
    rhs: Arc<dyn Function>,
}

impl NumericOp {
    fn operands(&self, ctx: FunctionContext<'_>) -> Result<(Value, Value), QueryError> {
        Ok((self.lhs.exec(ctx)?, self.rhs.exec(ctx)?))
    }

    fn bad_operands(&self, l: &Value, r: &Value) -> QueryError {
        QueryError::BadOperands {
            op: self.op.verb(),
            left_kind: l.kind(),
            left: self.lhs.annotation(),
            right_kind: r.kind(),
            right: self.rhs.annotation(),
        }
    }

    fn divide_by_zero(&self) -> QueryError {
        QueryError::DivideByZero {
            annotation: self.lhs.annotation(),
        }
    }
}

impl Function for NumericOp {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let (l, r) = self.operands(ctx)?;

        if self.op == Operator::Add {
            if let (Value::String(a), Value::String(b)) = (&l, &r) {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                return Ok(Value::String(out));
            }
        }

        let (Ok(ln), Ok(rn)) = (l.as_number(), r.as_number()) else {
            return Err(self.bad_operands(&l, &r));
        };

        let out = match (self.op, degrade(ln, rn)) {
            (Operator::Add, Degraded::Ints(a, b)) => Number::Int(a.wrapping_add(b)),
            (Operator::Add, Degraded::Floats(a, b)) => Number::Float(a + b),
            (Operator::Sub, Degraded::Ints(a, b)) => Number::Int(a.wrapping_sub(b)),
            (Operator::Sub, Degraded::Floats(a, b)) => Number::Float(a - b),
            (Operator::Mul, Degraded::Ints(a, b)) => Number::Int(a.wrapping_mul(b)),
            (Operator::Mul, Degraded::Floats(a, b)) => Number::Float(a * b),
            (Operator::Div, Degraded::Ints(a, b)) => {
                if b == 0 {
                    return Err(self.divide_by_zero());
                }
                // Integral division stays integral, otherwise promote.
                if a.wrapping_rem(b) == 0 {
                    Number::Int(a.wrapping_div(b))
                } else {
                    Number::Float(a as f64 / b as f64)
                }
            }
            (Operator::Div, Degraded::Floats(a, b)) => {
                if b == 0.0 {
                    return Err(self.divide_by_zero());
                }
                Number::Float(a / b)
            }
            (Operator::Mod, Degraded::Ints(a, b)) => {
                if b == 0 {
                    return Err(self.divide_by_zero());
                }
                Number::Int(a.wrapping_rem(b))
            }
            (Operator::Mod, Degraded::Floats(a, b)) => {
                if b == 0.0 {
                    return Err(self.divide_by_zero());
                }
                Number::Float(a % b)
            }
            _ => unreachable!("non-numeric operator routed to NumericOp"),
        };
        Ok(Value::Number(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.lhs.as_ref(), self.rhs.as_ref()])
    }

    fn annotation(&self) -> String {
        format!(
            "{} {} {}",
            self.lhs.annotation(),
            self.op.symbol(),
            self.rhs.annotation()
        )
    }
}

/// `==` / `!=`: heterogeneous-safe, never errors on differing kinds.
struct Equality {
    negated: bool,
    lhs: Arc<dyn Function>,
    rhs: Arc<dyn Function>,
}

impl Function for Equality {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let l = self.lhs.exec(ctx)?;
        let r = self.rhs.exec(ctx)?;
        let eq = l == r;
        Ok(Value::Bool(eq != self.negated))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.lhs.as_ref(), self.rhs.as_ref()])
    }

    fn annotation(&self) -> String {
        let sym = if self.negated { "!=" } else { "==" };
        format!("{} {} {}", self.lhs.annotation(), sym, self.rhs.annotation())
    }
}

/// `< <= > >=`: both operands must share an ordered kind.
struct OrderedCompare {
    op: Operator,
    lhs: Arc<dyn Function>,
    rhs: Arc<dyn Function>,
}

impl Function for OrderedCompare {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let l = self.lhs.exec(ctx)?;
        let r = self.rhs.exec(ctx)?;

        let ord = match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(_) | Value::Bytes(_), Value::String(_) | Value::Bytes(_)) => {
                Some(l.coerce_string().cmp(&r.coerce_string()))
            }
            _ => {
                return Err(QueryError::Incomparable {
                    left_kind: l.kind(),
                    left: self.lhs.annotation(),
                    right_kind: r.kind(),
                    right: self.rhs.annotation(),
                });
            }
        };
        let res = match ord {
            Some(Ordering::Less) => matches!(self.op, Operator::Lt | Operator::Lte),
            Some(Ordering::Equal) => matches!(self.op, Operator::Lte | Operator::Gte),
            Some(Ordering::Greater) => matches!(self.op, Operator::Gt | Operator::Gte),
            None => false,
        };
        Ok(Value::Bool(res))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.lhs.as_ref(), self.rhs.as_ref()])
    }

    fn annotation(&self) -> String {
        format!(
            "{} {} {}",
            self.lhs.annotation(),
            self.op.symbol(),
            self.rhs.annotation()
        )
    }
}

/// `&&`: a false left side skips the right side entirely.
struct LogicalAnd {
    lhs: Arc<dyn Function>,
    rhs: Arc<dyn Function>,
}

impl Function for LogicalAnd {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let l = self.lhs.exec(ctx)?;
        let l = l
            .as_bool()
            .map_err(|e| QueryError::from(e).at(self.lhs.annotation()))?;
        if !l {
            return Ok(Value::Bool(false));
        }
        let r = self.rhs.exec(ctx)?;
        let r = r
            .as_bool()
            .map_err(|e| QueryError::from(e).at(self.rhs.annotation()))?;
        Ok(Value::Bool(r))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.lhs.as_ref(), self.rhs.as_ref()])
    }

    fn annotation(&self) -> String {
        format!("{} && {}", self.lhs.annotation(), self.rhs.annotation())
    }
}

/// `||`: a true left side skips the right side entirely.
struct LogicalOr {
    lhs: Arc<dyn Function>,
    rhs: Arc<dyn Function>,
}

impl Function for LogicalOr {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let l = self.lhs.exec(ctx)?;
        let l = l
            .as_bool()
            .map_err(|e| QueryError::from(e).at(self.lhs.annotation()))?;
        if l {
            return Ok(Value::Bool(true));
        }
        let r = self.rhs.exec(ctx)?;
        let r = r
            .as_bool()
            .map_err(|e| QueryError::from(e).at(self.rhs.annotation()))?;
        Ok(Value::Bool(r))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.lhs.as_ref(), self.rhs.as_ref()])
    }

    fn annotation(&self) -> String {
        format!("{} || {}", self.lhs.annotation(), self.rhs.annotation())
    }
}

/// `|`: take the left side unless it errors or resolves to null, delete, or
/// nothing.
struct Coalesce {
    lhs: Arc<dyn Function>,
    rhs: Arc<dyn Function>,
}

impl Function for Coalesce {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.lhs.exec(ctx) {
            Ok(Value::Null) | Ok(Value::Delete) | Ok(Value::Nothing) | Err(_) => self.rhs.exec(ctx),
            Ok(v) => Ok(v),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.lhs.as_ref(), self.rhs.as_ref()])
    }

    fn annotation(&self) -> String {
        format!("{} | {}", self.lhs.annotation(), self.rhs.annotation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::function::Literal;

    fn expr(fns: Vec<Arc<dyn Function>>, ops: Vec<Operator>) -> Arc<dyn Function> {
        new_arithmetic_expression(fns, ops).unwrap()
    }

    fn lit(v: impl Into<Value>) -> Arc<dyn Function> {
        Arc::new(Literal::new(v.into()))
    }

    fn exec(f: &dyn Function) -> Result<Value, QueryError> {
        let batch = crate::message::MessageBatch::new();
        let vars = std::collections::HashMap::new();
        let maps = std::collections::HashMap::new();
        f.exec(FunctionContext::new(&batch, &vars, &maps))
    }

    #[test]
    fn precedence_orders_mul_before_add() {
        // 2 + 3 * 4 == 14
        let f = expr(
            vec![lit(2i64), lit(3i64), lit(4i64)],
            vec![Operator::Add, Operator::Mul],
        );
        assert_eq!(exec(f.as_ref()).unwrap(), Value::from(14i64));
    }

    #[test]
    fn integral_division_stays_integral() {
        let f = expr(vec![lit(12i64), lit(3i64)], vec![Operator::Div]);
        assert!(matches!(
            exec(f.as_ref()).unwrap(),
            Value::Number(Number::Int(4))
        ));

        let f = expr(vec![lit(7i64), lit(2i64)], vec![Operator::Div]);
        assert!(matches!(
            exec(f.as_ref()).unwrap(),
            Value::Number(Number::Float(_))
        ));
    }

    #[test]
    fn operand_count_must_match() {
        assert!(new_arithmetic_expression(vec![lit(1i64)], vec![Operator::Add]).is_err());
    }
}
