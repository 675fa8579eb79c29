use std::fmt::{self, Write};

use super::{Callable, Instruction, IoSink, Program, Vm};
use crate::value::Value;

/// Operand as it appears in a listing: `INT(3)`, `REAL(1.5)`, `STR(x)`, `BOOL(!t)`.
fn operand(value: &Value) -> String {
    match value {
        Value::Integer(i) => format!("INT({})", i),
        Value::Real(r) => format!("REAL({})", r),
        Value::String(s) => format!("STR({})", s),
        Value::Boolean(b) => format!("BOOL({})", Value::Boolean(*b)),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<9}", self.op.mnemonic())?;
        for value in self.operands.iter().take(self.op.arity()) {
            write!(f, " {}", operand(value))?;
        }
        Ok(())
    }
}

pub fn disassemble(program: &Program) -> String {
    let mut output = String::new();
    let _ = disassemble_to(program, &mut output);
    output
}

pub fn disassemble_to(program: &Program, w: &mut impl Write) -> fmt::Result {
    writeln!(w, "=== Program ({} instructions, {} registers) ===", program.len(), program.register_count)?;
    for (pc, inst) in program.code.iter().enumerate() {
        writeln!(w, "{:5}: {}", pc, inst.to_string().trim_end())?;
    }
    Ok(())
}

/// Registers in use, Result, call stack and the three object namespaces.
/// Map entries are sorted by name so dumps are stable.
pub fn dump_state<S: IoSink>(vm: &Vm<S>) -> String {
    let mut output = String::new();
    let _ = dump_state_to(vm, &mut output);
    output
}

pub fn dump_state_to<S: IoSink>(vm: &Vm<S>, w: &mut impl Write) -> fmt::Result {
    writeln!(w, "=== VM state (pc {}, entry {}) ===", vm.pc(), vm.entry())?;

    writeln!(w, "Registers:")?;
    for (i, value) in vm.registers().live() {
        writeln!(w, "  R[{}] = {}", i, operand(value))?;
    }
    writeln!(w, "  Result = {}", operand(vm.result()))?;

    let frames: Vec<String> = vm.call_stack().return_pcs().map(|pc| pc.to_string()).collect();
    writeln!(w, "Call stack ({}): [{}]", frames.len(), frames.join(", "))?;

    let mut scalars: Vec<_> = vm.objects().scalars().collect();
    scalars.sort_by(|a, b| a.0.cmp(b.0));
    writeln!(w, "Scalars ({}):", scalars.len())?;
    for (name, value) in scalars {
        writeln!(w, "  {} = {}", name, operand(value))?;
    }

    let mut arrays: Vec<_> = vm.objects().arrays().collect();
    arrays.sort_by(|a, b| a.0.cmp(b.0));
    writeln!(w, "Arrays ({}):", arrays.len())?;
    for (name, items) in arrays {
        let items: Vec<String> = items.iter().map(operand).collect();
        writeln!(w, "  {} = [{}]", name, items.join(", "))?;
    }

    let mut functions: Vec<_> = vm
        .objects()
        .functions()
        .filter_map(|(name, callable)| match callable {
            Callable::UserDefined { entry, end, params } => Some((name, *entry, *end, params)),
            Callable::Builtin { .. } => None,
        })
        .collect();
    functions.sort_by(|a, b| a.0.cmp(b.0));
    writeln!(w, "Functions ({}):", functions.len())?;
    for (name, entry, end, params) in functions {
        writeln!(w, "  {}({}) @ {}..={}", name, params.join(", "), entry, end)?;
    }
    Ok(())
}
