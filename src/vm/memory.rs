use std::collections::HashMap;
use std::rc::Rc;

use super::{Instruction, VmError, VmResult};
use crate::value::Value;

pub const REGISTER_COUNT: usize = 1024;

// ── Register file ────────────────────────────────────────────────────

pub struct RegisterFile {
    slots: Box<[Value]>,
    result: Value,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            slots: vec![Value::default(); REGISTER_COUNT].into_boxed_slice(),
            result: Value::default(),
        }
    }

    /// Indices come from the compiler and are in range by construction.
    pub fn get(&self, index: usize) -> &Value {
        &self.slots[index]
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = value;
    }

    /// Resets every numbered slot. Result is left alone.
    pub fn clear(&mut self) {
        self.slots.fill(Value::default());
    }

    pub(crate) fn snapshot(&self, width: usize) -> Vec<Value> {
        self.slots[..width.min(REGISTER_COUNT)].to_vec()
    }

    pub(crate) fn restore(&mut self, saved: Vec<Value>) {
        for (slot, value) in self.slots.iter_mut().zip(saved) {
            *slot = value;
        }
    }

    /// Slots that differ from the default, in index order.
    pub fn live(&self) -> impl Iterator<Item = (usize, &Value)> {
        let default = Value::default();
        self.slots.iter().enumerate().filter(move |(_, v)| **v != default)
    }
}

// ── Object table ─────────────────────────────────────────────────────

/// A resolved function-namespace entry.
#[derive(Debug, Clone)]
pub enum Callable {
    /// Runs its template inline; there is no jump target.
    Builtin { template: Rc<[Instruction]> },
    /// `entry` is the first instruction after the definition marker, `end`
    /// the index of its return marker.
    UserDefined { entry: usize, end: usize, params: Rc<[String]> },
}

/// Scalars, functions and arrays live in separate namespaces.
#[derive(Default)]
pub struct ObjectTable {
    scalars: HashMap<String, Value>,
    functions: HashMap<String, Callable>,
    arrays: HashMap<String, Vec<Value>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(&self, name: &str) -> VmResult<&Value> {
        self.scalars.get(name).ok_or_else(|| VmError::UndefinedObject { name: name.to_string() })
    }

    /// Creates the entry on first write.
    pub fn set_scalar(&mut self, name: &str, value: Value) {
        match self.scalars.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.scalars.insert(name.to_string(), value);
            }
        }
    }

    pub fn take_scalar(&mut self, name: &str) -> Option<Value> {
        self.scalars.remove(name)
    }

    /// Puts back a binding saved before a call; `None` means there was none.
    pub(crate) fn restore_scalar(&mut self, name: &str, prior: Option<Value>) {
        match prior {
            Some(value) => self.set_scalar(name, value),
            None => {
                self.scalars.remove(name);
            }
        }
    }

    pub fn function(&self, name: &str) -> VmResult<&Callable> {
        self.functions.get(name).ok_or_else(|| VmError::UndefinedFunction { name: name.to_string() })
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn define_function(&mut self, name: &str, callable: Callable) {
        self.functions.insert(name.to_string(), callable);
    }

    pub fn array(&self, name: &str) -> VmResult<&Vec<Value>> {
        self.arrays.get(name).ok_or_else(|| VmError::UndefinedArray { name: name.to_string() })
    }

    pub fn array_mut(&mut self, name: &str) -> VmResult<&mut Vec<Value>> {
        self.arrays.get_mut(name).ok_or_else(|| VmError::UndefinedArray { name: name.to_string() })
    }

    /// Creates the array, or empties it if it already exists.
    pub fn make_array(&mut self, name: &str) {
        self.arrays.insert(name.to_string(), Vec::new());
    }

    /// Appends, creating the array on first push. Returns the new length.
    pub fn push_array(&mut self, name: &str, value: Value) -> usize {
        let items = self.arrays.entry(name.to_string()).or_default();
        items.push(value);
        items.len()
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.scalars.iter()
    }

    pub fn functions(&self) -> impl Iterator<Item = (&String, &Callable)> {
        self.functions.iter()
    }

    pub fn arrays(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.arrays.iter()
    }
}

// ── Call stack ───────────────────────────────────────────────────────

/// One user-defined call in flight.
#[derive(Debug)]
pub struct Frame {
    pub return_pc: usize,
    /// Caller's registers, put back on return.
    pub registers: Vec<Value>,
    /// Bindings of the callee's parameter names before the call.
    pub shadowed: Vec<(String, Option<Value>)>,
}

#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        CallStack { frames: Vec::with_capacity(64) }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> VmResult<Frame> {
        self.frames.pop().ok_or(VmError::CallStackUnderflow)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Return addresses, innermost last.
    pub fn return_pcs(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.iter().map(|f| f.return_pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_start_at_default() {
        let regs = RegisterFile::new();
        assert_eq!(regs.get(0), &Value::Integer(0));
        assert_eq!(regs.get(REGISTER_COUNT - 1), &Value::Integer(0));
        assert_eq!(regs.live().count(), 0);
    }

    #[test]
    fn snapshot_and_restore() {
        let mut regs = RegisterFile::new();
        regs.set(1, Value::from("a"));
        let saved = regs.snapshot(4);
        regs.set(1, Value::from("b"));
        regs.set(9, Value::from("outside"));
        regs.restore(saved);
        assert_eq!(regs.get(1), &Value::from("a"));
        assert_eq!(regs.get(9), &Value::from("outside"));
    }

    #[test]
    fn clear_keeps_result() {
        let mut regs = RegisterFile::new();
        regs.set(2, Value::Integer(5));
        regs.set_result(Value::Boolean(true));
        regs.clear();
        assert_eq!(regs.get(2), &Value::Integer(0));
        assert_eq!(regs.result(), &Value::Boolean(true));
    }

    #[test]
    fn scalars_are_created_lazily() {
        let mut mem = ObjectTable::new();
        assert!(matches!(mem.scalar("x"), Err(VmError::UndefinedObject { .. })));
        mem.set_scalar("x", Value::Integer(1));
        mem.set_scalar("x", Value::Integer(2));
        assert_eq!(mem.scalar("x").unwrap(), &Value::Integer(2));
        assert_eq!(mem.take_scalar("x"), Some(Value::Integer(2)));
        assert!(mem.scalar("x").is_err());
    }

    #[test]
    fn namespaces_are_disjoint() {
        let mut mem = ObjectTable::new();
        mem.set_scalar("thing", Value::Integer(1));
        mem.push_array("thing", Value::Integer(2));
        assert!(mem.function("thing").is_err());
        assert_eq!(mem.scalar("thing").unwrap(), &Value::Integer(1));
        assert_eq!(mem.array("thing").unwrap(), &vec![Value::Integer(2)]);
    }

    #[test]
    fn restore_scalar_removes_when_absent_before() {
        let mut mem = ObjectTable::new();
        mem.set_scalar("p", Value::Integer(1));
        mem.restore_scalar("p", None);
        assert!(mem.scalar("p").is_err());
        mem.restore_scalar("p", Some(Value::Integer(3)));
        assert_eq!(mem.scalar("p").unwrap(), &Value::Integer(3));
    }

    #[test]
    fn call_stack_underflow() {
        let mut stack = CallStack::new();
        assert!(matches!(stack.pop(), Err(VmError::CallStackUnderflow)));
        stack.push(Frame { return_pc: 7, registers: Vec::new(), shadowed: Vec::new() });
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.pop().unwrap().return_pc, 7);
    }
}
