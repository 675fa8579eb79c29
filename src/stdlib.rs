//! The builtin table shared by the compiler and the VM.
//!
//! Builtins take their arguments in fixed registers `R[0]..R[arity-1]` and
//! leave their return value in Result. Each one is an instruction template
//! that the VM runs inline at the call site.

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;
use crate::vm::{n, r, Instruction, Op, Syscall, STDOUT};

/// Registers reserved for builtin arguments. The compiler allocates
/// temporaries above them.
pub const ARG_SLOTS: usize = 4;

/// Control forms the compiler lowers itself. They are reserved names but
/// have no template.
pub const CONTROL_FORMS: [&str; 3] = ["for", "chain", "include"];

#[derive(Debug, Clone)]
pub struct StdEntry {
    pub arity: usize,
    /// First argument is an object name, so a bare reference there compiles
    /// to the name rather than the object's value.
    pub takes_name: bool,
    pub template: Rc<[Instruction]>,
}

impl StdEntry {
    fn new(arity: usize, template: Vec<Instruction>) -> Self {
        StdEntry { arity, takes_name: false, template: template.into() }
    }

    fn named(mut self) -> Self {
        self.takes_name = true;
        self
    }
}

pub struct Stdlib {
    entries: HashMap<&'static str, StdEntry>,
}

impl Default for Stdlib {
    fn default() -> Self {
        Self::new()
    }
}

fn binary(op: Op) -> StdEntry {
    StdEntry::new(2, vec![Instruction::abc(op, r(0), r(0), r(1)), Instruction::a(Op::RslSet, r(0))])
}

fn unary(op: Op) -> StdEntry {
    StdEntry::new(1, vec![Instruction::ab(op, r(0), r(0)), Instruction::a(Op::RslSet, r(0))])
}

fn syscall(arity: usize, call: Syscall) -> StdEntry {
    StdEntry::new(arity, vec![Instruction::a(Op::Syscall, call.immediate())])
}

impl Stdlib {
    pub fn new() -> Self {
        let mut entries = HashMap::new();

        entries.insert("add", binary(Op::Add));
        entries.insert("sub", binary(Op::Sub));
        entries.insert("mul", binary(Op::Mul));
        entries.insert("div", binary(Op::Div));
        entries.insert("mod", binary(Op::Mod));
        entries.insert("concat", binary(Op::Add));

        entries.insert("same", binary(Op::CmpEq));
        entries.insert("notsame", binary(Op::CmpNeq));
        entries.insert("gt", binary(Op::CmpGt));
        entries.insert("lt", binary(Op::CmpLt));
        entries.insert("gte", binary(Op::CmpGte));
        entries.insert("lte", binary(Op::CmpLte));

        entries.insert("and", binary(Op::And));
        entries.insert("or", binary(Op::Or));
        entries.insert("not", unary(Op::Not));

        entries.insert(
            "ifel",
            StdEntry::new(3, vec![Instruction::abc(Op::Brch, r(0), r(1), r(2)), Instruction::a(Op::RslSet, r(0))]),
        );
        entries.insert(
            "set",
            StdEntry::new(2, vec![Instruction::ab(Op::StrInd, r(0), r(1)), Instruction::a(Op::RslSet, r(1))]).named(),
        );
        entries.insert(
            "print",
            StdEntry::new(
                1,
                vec![
                    Instruction::ab(Op::Str, n(STDOUT), r(0)),
                    Instruction::a(Op::Syscall, Syscall::IoFlush.immediate()),
                    Instruction::a(Op::RslSet, r(0)),
                ],
            ),
        );
        entries.insert(
            "exit",
            StdEntry::new(0, vec![Instruction::a(Op::Syscall, Syscall::IoFlush.immediate()), Instruction::new(Op::Hlt)]),
        );

        entries.insert("toint", unary(Op::CastInt));
        entries.insert("toreal", unary(Op::CastReal));
        entries.insert("tostr", unary(Op::CastStr));

        entries.insert("strlen", syscall(1, Syscall::StrLen));
        entries.insert("substr", syscall(3, Syscall::SubStr));
        entries.insert("strindex", syscall(2, Syscall::StrIndex));
        entries.insert("strreplace", syscall(3, Syscall::StrReplace));
        entries.insert("regexp", syscall(2, Syscall::RegExp));

        entries.insert("arrmake", syscall(1, Syscall::ArrMake).named());
        entries.insert("arrpush", syscall(2, Syscall::ArrPush).named());
        entries.insert("arrset", syscall(3, Syscall::ArrSet).named());
        entries.insert("arrget", syscall(2, Syscall::ArrGet).named());
        entries.insert("arrlen", syscall(1, Syscall::ArrLen).named());

        entries.insert("getenv", syscall(1, Syscall::GetEnv));
        entries.insert("exec", syscall(1, Syscall::Exec));
        entries.insert("ostype", syscall(0, Syscall::GetOsType));

        Stdlib { entries }
    }

    pub fn get(&self, name: &str) -> Option<&StdEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Builtins and control forms; user code may not define any of these.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.contains(name) || CONTROL_FORMS.contains(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &StdEntry)> {
        self.entries.iter().map(|(name, entry)| (*name, entry))
    }

    /// Builtin names in sorted order, for help output and diagnostics.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// The value a builtin name evaluates to when passed as an argument.
pub fn name_value(name: &str) -> Value {
    Value::String(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arities_fit_argument_slots() {
        let stdlib = Stdlib::new();
        for (name, entry) in stdlib.iter() {
            assert!(entry.arity <= ARG_SLOTS, "{name} needs {} slots", entry.arity);
        }
    }

    #[test]
    fn control_forms_are_reserved_without_templates() {
        let stdlib = Stdlib::new();
        for form in CONTROL_FORMS {
            assert!(stdlib.is_reserved(form));
            assert!(stdlib.get(form).is_none());
        }
        assert!(!stdlib.is_reserved("my_function"));
    }

    #[test]
    fn name_taking_builtins() {
        let stdlib = Stdlib::new();
        let named: Vec<_> = stdlib.names().into_iter().filter(|n| stdlib.get(n).unwrap().takes_name).collect();
        assert_eq!(named, vec!["arrget", "arrlen", "arrmake", "arrpush", "arrset", "set"]);
    }

    #[test]
    fn templates_have_no_control_flow() {
        let stdlib = Stdlib::new();
        for (name, entry) in stdlib.iter() {
            for inst in entry.template.iter() {
                assert!(
                    !matches!(inst.op, Op::Call | Op::Return | Op::DefFunc | Op::Jmp | Op::Jmpf),
                    "{name} contains {}",
                    inst.op.mnemonic()
                );
            }
        }
    }

    #[test]
    fn concat_shares_add() {
        let stdlib = Stdlib::new();
        assert_eq!(stdlib.get("concat").unwrap().template, stdlib.get("add").unwrap().template);
    }
}
