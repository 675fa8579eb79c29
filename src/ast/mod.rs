use serde::{Deserialize, Serialize};

pub use crate::value::Value;

// ---- Core AST types ----
//
// The parser lives outside this crate. It hands over an `Ast`, either built
// in memory or serialized as JSON through serde.

/// A whole source file: top-level items in source order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ast {
    pub items: Vec<Item>,
}

/// Top-level items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    /// `@define name(params) body`
    Define(FunctionDef),
    /// `@name(args)` at top level
    Call(Call),
    /// Free text between calls, echoed to output
    Text(String),
}

/// A function body is exactly one expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    Value(Value),
    Call(Call),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Literal(Value),
    Ref(String),
    Call(Call),
}

impl Ast {
    pub fn new(items: Vec<Item>) -> Self {
        Ast { items }
    }
}

impl Call {
    pub fn new(name: impl Into<String>, args: Vec<Argument>) -> Self {
        Call { name: name.into(), args }
    }
}

impl FunctionDef {
    /// A zero-parameter definition whose body is a constant.
    pub fn value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        FunctionDef { name: name.into(), params: Vec::new(), body: Body::Value(value.into()) }
    }

    pub fn call(name: impl Into<String>, params: &[&str], body: Call) -> Self {
        FunctionDef {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body: Body::Call(body),
        }
    }
}

impl Argument {
    pub fn lit(value: impl Into<Value>) -> Self {
        Argument::Literal(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Argument::Ref(name.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Argument>) -> Self {
        Argument::Call(Call::new(name, args))
    }
}

impl From<FunctionDef> for Item {
    fn from(def: FunctionDef) -> Self {
        Item::Define(def)
    }
}

impl From<Call> for Item {
    fn from(call: Call) -> Self {
        Item::Call(call)
    }
}
