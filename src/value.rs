use serde::{Deserialize, Serialize};

use crate::vm::VmError;

/// The one runtime type. AST literals, registers, instruction operands and
/// object-table entries all carry a `Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Integer(0)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            // f64's Display is already the shortest string that round-trips.
            Value::Real(n) => write!(f, "{}", n),
            Value::Boolean(true) => write!(f, "!t"),
            Value::Boolean(false) => write!(f, "!f"),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Real(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Real(_))
    }
}

// ── Arithmetic and comparison ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn verb(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "subtract",
            ArithOp::Mul => "multiply",
            ArithOp::Div => "divide",
            ArithOp::Mod => "take the modulus of",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Gte,
    Lte,
}

/// Integer∘Integer stays Integer, any Real widens the pair to Real, and
/// `Add` with a String on either side concatenates the rendered operands.
pub fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, VmError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => int_arith(op, *a, *b),
        (Value::Integer(a), Value::Real(b)) => Ok(Value::Real(real_arith(op, *a as f64, *b))),
        (Value::Real(a), Value::Integer(b)) => Ok(Value::Real(real_arith(op, *a, *b as f64))),
        (Value::Real(a), Value::Real(b)) => Ok(Value::Real(real_arith(op, *a, *b))),
        (Value::String(_), other) | (other, Value::String(_))
            if op == ArithOp::Add && (other.is_numeric() || matches!(other, Value::String(_))) =>
        {
            Ok(Value::String(format!("{}{}", lhs, rhs)))
        }
        _ => Err(VmError::Type(format!(
            "cannot {} {} and {}",
            op.verb(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<Value, VmError> {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            a.checked_div(b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            a.checked_rem(b)
        }
    };
    result
        .map(Value::Integer)
        .ok_or_else(|| VmError::Type(format!("integer overflow in {}", op.verb())))
}

fn real_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => a % b,
    }
}

/// Ordering comparisons. Numbers widen like arithmetic does; two Strings
/// compare lexicographically; anything else is a fault.
pub fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, VmError> {
    let ordering = match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Value::Integer(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
        (Value::Real(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => {
            return Err(VmError::Type(format!(
                "cannot order {} against {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    };
    // NaN compares false against everything
    let Some(ordering) = ordering else { return Ok(false) };
    Ok(match op {
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Gte => ordering.is_ge(),
        CmpOp::Lte => ordering.is_le(),
    })
}

/// Equality never coerces: the variant has to match before the payload is compared.
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    lhs == rhs
}

pub fn logic_and(lhs: &Value, rhs: &Value) -> Result<Value, VmError> {
    match (lhs, rhs) {
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a && *b)),
        _ => Err(VmError::Type(format!("'and' needs booleans, got {} and {}", lhs.type_name(), rhs.type_name()))),
    }
}

pub fn logic_or(lhs: &Value, rhs: &Value) -> Result<Value, VmError> {
    match (lhs, rhs) {
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a || *b)),
        _ => Err(VmError::Type(format!("'or' needs booleans, got {} and {}", lhs.type_name(), rhs.type_name()))),
    }
}

pub fn logic_not(v: &Value) -> Result<Value, VmError> {
    match v {
        Value::Boolean(b) => Ok(Value::Boolean(!b)),
        _ => Err(VmError::Type(format!("'not' needs a boolean, got {}", v.type_name()))),
    }
}

// ── Casts ───────────────────────────────────────────────────────────

pub fn to_integer(v: &Value) -> Result<Value, VmError> {
    match v {
        Value::Integer(n) => Ok(Value::Integer(*n)),
        // i64::MAX as f64 rounds up to 2^63, which is already out of range.
        Value::Real(n) if n.is_finite() && n.trunc() >= i64::MIN as f64 && n.trunc() < i64::MAX as f64 => {
            Ok(Value::Integer(n.trunc() as i64))
        }
        Value::Real(n) => Err(VmError::Type(format!("cannot convert {} to integer", n))),
        Value::Boolean(b) => Ok(Value::Integer(*b as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| VmError::Type(format!("cannot convert \"{}\" to integer", s))),
    }
}

pub fn to_real(v: &Value) -> Result<Value, VmError> {
    match v {
        Value::Integer(n) => Ok(Value::Real(*n as f64)),
        Value::Real(n) => Ok(Value::Real(*n)),
        Value::Boolean(b) => Ok(Value::Real(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| VmError::Type(format!("cannot convert \"{}\" to real", s))),
    }
}

pub fn to_string_value(v: &Value) -> Value {
    Value::String(v.to_string())
}
