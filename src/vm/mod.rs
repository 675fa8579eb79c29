use std::rc::Rc;

use tracing::{debug, trace};

use crate::stdlib::Stdlib;
use crate::value::{self, ArithOp, CmpOp, Value};

pub mod compile;
pub mod disasm;
pub mod io;
pub mod memory;
pub mod syscall;

pub use compile::{compile, Compiler};
pub use io::{BufferedSink, IoSink};
pub use memory::{CallStack, Callable, Frame, ObjectTable, RegisterFile, REGISTER_COUNT};
pub use syscall::Syscall;

/// Name of the scalar that output is staged in before a flush.
pub const STDOUT: &str = "stdout";

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("include takes exactly one string literal")]
    IncludeArgument,
    #[error("include is only allowed at top level")]
    IncludeNotTopLevel,
    #[error("cannot read include '{path}': {source}")]
    IncludeLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse include '{path}': {message}")]
    IncludeParse { path: String, message: String },
    #[error("include cycle through '{path}'")]
    IncludeCycle { path: String },
    #[error("'{form}' takes {expected} arguments, got {found}")]
    ControlArity { form: &'static str, expected: &'static str, found: usize },
    #[error("chain step must be a call or a function name, got {found}")]
    ChainStep { found: String },
    #[error("'{name}' takes {expected} arguments, got {found}")]
    ArityMismatch { name: String, expected: usize, found: usize },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("'{name}' is a builtin and cannot be redefined")]
    ReservedName { name: String },
    #[error("expression needs more than {} registers", REGISTER_COUNT)]
    RegisterOverflow,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("function '{name}' is defined more than once")]
    DuplicateFunction { name: String },
    #[error("'{name}' is a builtin and cannot be defined")]
    ReservedFunction { name: String },
    #[error("function '{name}' has no return")]
    UnterminatedFunction { name: String },
    #[error("malformed function definition at {pc}")]
    MalformedDefinition { pc: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("undefined object: {name}")]
    UndefinedObject { name: String },
    #[error("undefined array: {name}")]
    UndefinedArray { name: String },
    #[error("call stack underflow")]
    CallStackUnderflow,
    #[error("operand {index} of instruction {pc} must be {expected}")]
    Operand { pc: usize, index: usize, expected: &'static str },
    #[error("{0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} out of range for array '{name}' of length {len}")]
    IndexOutOfRange { name: String, index: i64, len: usize },
    #[error("syscall {code}: {message}")]
    Syscall { code: i64, message: String },
    #[error("unknown syscall: {code}")]
    UnknownSyscall { code: i64 },
    #[error("cannot redefine '{name}': {message}")]
    Patch { name: String, message: String },
    #[error("{op} is not allowed inside a builtin")]
    IllegalInBuiltin { op: &'static str },
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VmResult<T> = Result<T, VmError>;

// ── Instruction set ──────────────────────────────────────────────────
//
// Operand layout, `a b c`:
//   R[x]  register x (Integer immediate)
//   M[n]  scalar object n (String immediate)
//   K     literal immediate

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    RegSet,  // R[a] = K b
    RegMov,  // R[a] = R[b]
    Ldr,     // R[a] = M[b]
    Str,     // M[a] = R[b]
    StrInd,  // M[R[a]] = R[b]; redefines a value function if R[a] names one
    MemSet,  // M[a] = K b
    MemMov,  // M[a] = M[b]
    RslSet,  // Result = R[a]
    RslMov,  // R[a] = Result
    DefFunc, // definition marker: a = name, b = arity
    Call,    // a = function name
    Return,
    Syscall, // a = syscall number
    Add,     // R[a] = R[b] + R[c]
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Not,     // R[a] = !R[b]
    CmpEq,
    CmpNeq,
    CmpGt,
    CmpLt,
    CmpGte,
    CmpLte,
    Brch,    // R[a] = if R[a] { R[b] } else { R[c] }
    Jmp,     // pc = a
    Jmpf,    // if R[a] is false, pc = b
    CastInt, // R[a] = int(R[b])
    CastReal,
    CastStr,
    ClearReg,
    Hlt,
}

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::RegSet => "REGSET",
            Op::RegMov => "REGMOV",
            Op::Ldr => "LDR",
            Op::Str => "STR",
            Op::StrInd => "STRIND",
            Op::MemSet => "MEMSET",
            Op::MemMov => "MEMMOV",
            Op::RslSet => "RSLSET",
            Op::RslMov => "RSLMOV",
            Op::DefFunc => "DEFFUNC",
            Op::Call => "CALL",
            Op::Return => "RETURN",
            Op::Syscall => "SYSCALL",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Not => "NOT",
            Op::CmpEq => "CMPEQ",
            Op::CmpNeq => "CMPNEQ",
            Op::CmpGt => "CMPGT",
            Op::CmpLt => "CMPLT",
            Op::CmpGte => "CMPGTE",
            Op::CmpLte => "CMPLTE",
            Op::Brch => "BRCH",
            Op::Jmp => "JMP",
            Op::Jmpf => "JMPF",
            Op::CastInt => "CASTINT",
            Op::CastReal => "CASTREAL",
            Op::CastStr => "CASTSTR",
            Op::ClearReg => "CLEARREG",
            Op::Hlt => "HLT",
        }
    }

    /// How many of the three operands the opcode reads.
    pub fn arity(self) -> usize {
        match self {
            Op::Return | Op::ClearReg | Op::Hlt => 0,
            Op::RslSet | Op::RslMov | Op::Call | Op::Syscall | Op::Jmp => 1,
            Op::RegSet | Op::RegMov | Op::Ldr | Op::Str | Op::StrInd | Op::MemSet | Op::MemMov
            | Op::DefFunc | Op::Not | Op::Jmpf | Op::CastInt | Op::CastReal | Op::CastStr => 2,
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or | Op::CmpEq
            | Op::CmpNeq | Op::CmpGt | Op::CmpLt | Op::CmpGte | Op::CmpLte | Op::Brch => 3,
        }
    }
}

/// An instruction operand. Register indices and numeric literals are Integer
/// immediates, object and function names are String immediates. Operands and
/// registers share the one `Value` representation.
pub type Immediate = Value;

/// Register operand
pub fn r(index: usize) -> Immediate {
    Value::Integer(index as i64)
}

/// Name operand
pub fn n(name: &str) -> Immediate {
    Value::String(name.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub operands: [Immediate; 3],
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Instruction { op, operands: Default::default() }
    }

    pub fn a(op: Op, a: Immediate) -> Self {
        Instruction { op, operands: [a, Value::default(), Value::default()] }
    }

    pub fn ab(op: Op, a: Immediate, b: Immediate) -> Self {
        Instruction { op, operands: [a, b, Value::default()] }
    }

    pub fn abc(op: Op, a: Immediate, b: Immediate, c: Immediate) -> Self {
        Instruction { op, operands: [a, b, c] }
    }

    fn reg(&self, pc: usize, index: usize) -> VmResult<usize> {
        match &self.operands[index] {
            Value::Integer(i) if *i >= 0 => Ok(*i as usize),
            _ => Err(VmError::Operand { pc, index, expected: "a register index" }),
        }
    }

    fn target(&self, pc: usize, index: usize) -> VmResult<usize> {
        match &self.operands[index] {
            Value::Integer(i) if *i >= 0 => Ok(*i as usize),
            _ => Err(VmError::Operand { pc, index, expected: "a jump target" }),
        }
    }

    fn name(&self, pc: usize, index: usize) -> VmResult<&str> {
        match &self.operands[index] {
            Value::String(s) => Ok(s),
            _ => Err(VmError::Operand { pc, index, expected: "a name" }),
        }
    }
}

// ── Program ──────────────────────────────────────────────────────────

/// Flat instruction list: function definition blocks followed by top-level code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub code: Vec<Instruction>,
    /// Register high-water mark reached by the compiler.
    pub register_count: usize,
}

impl Program {
    /// A hand-assembled program. Without an allocator to say otherwise, the
    /// whole register file counts as live.
    pub fn new(code: Vec<Instruction>) -> Self {
        Program { code, register_count: REGISTER_COUNT }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

// ── VM ───────────────────────────────────────────────────────────────

/// What the dispatch loop does after one instruction.
#[derive(Debug)]
pub(crate) enum Flow {
    Next,
    Jump(usize),
    Halt,
    /// Rewrite a value function in place.
    Patch { name: String, value: Value },
}

/// Registers, object table and output, everything an instruction may touch
/// apart from the program and the call stack.
pub(crate) struct Core<S> {
    pub(crate) reg: RegisterFile,
    pub(crate) mem: ObjectTable,
    pub(crate) io: S,
    pub(crate) regex_cache: std::collections::HashMap<String, regex::Regex>,
}

pub struct Vm<S: IoSink = BufferedSink<Vec<u8>>> {
    program: Program,
    core: Core<S>,
    stack: CallStack,
    pc: usize,
    entry: usize,
    /// Registers saved across a user-defined call.
    save_width: usize,
    /// Callee of each `Call` instruction, indexed by pc. `None` for other
    /// instructions and for names unknown at link time.
    call_sites: Vec<Option<Callable>>,
    halted: bool,
}

impl Vm<BufferedSink<Vec<u8>>> {
    /// VM writing into an in-memory buffer.
    pub fn new(program: Program) -> Result<Self, LinkError> {
        Vm::with_sink(program, BufferedSink::new(Vec::new()))
    }

    /// Everything flushed so far.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(self.core.io.get_ref()).into_owned()
    }
}

impl<S: IoSink> Vm<S> {
    pub fn with_sink(program: Program, io: S) -> Result<Self, LinkError> {
        let stdlib = Stdlib::new();
        let mut mem = ObjectTable::new();
        let entry = link(&program, &stdlib, &mut mem)?;
        let call_sites = resolve_call_sites(&program, &mem);
        let save_width = program.register_count.clamp(crate::stdlib::ARG_SLOTS, REGISTER_COUNT);
        Ok(Vm {
            program,
            core: Core {
                reg: RegisterFile::new(),
                mem,
                io,
                regex_cache: std::collections::HashMap::new(),
            },
            stack: CallStack::new(),
            pc: entry,
            entry,
            save_width,
            call_sites,
            halted: false,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.core.reg
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.core.mem
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn result(&self) -> &Value {
        self.core.reg.result()
    }

    pub fn sink(&self) -> &S {
        &self.core.io
    }

    pub fn into_sink(self) -> S {
        self.core.io
    }

    /// First instruction of top-level code.
    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Runs until the end of the program or a halt. A fault stops the loop
    /// where it happened; output flushed before it stays flushed.
    pub fn run(&mut self) -> VmResult<()> {
        while !self.halted && self.pc < self.program.code.len() {
            self.step()?;
        }
        if self.halted {
            debug!(pc = self.pc, "halted");
        }
        Ok(())
    }

    fn step(&mut self) -> VmResult<()> {
        let pc = self.pc;
        let inst = &self.program.code[pc];
        trace!(pc, op = inst.op.mnemonic(), "dispatch");

        match inst.op {
            Op::Call => {
                let callable = match self.call_sites.get(pc) {
                    Some(Some(resolved)) => resolved.clone(),
                    _ => self.core.mem.function(inst.name(pc, 0)?)?.clone(),
                };
                match callable {
                    Callable::UserDefined { entry, params, .. } => {
                        let shadowed = params
                            .iter()
                            .map(|p| (p.clone(), self.core.mem.scalar(p).ok().cloned()))
                            .collect();
                        self.stack.push(Frame {
                            return_pc: pc + 1,
                            registers: self.core.reg.snapshot(self.save_width),
                            shadowed,
                        });
                        self.pc = entry;
                    }
                    Callable::Builtin { template } => {
                        self.run_builtin(&template, pc)?;
                        self.pc = pc + 1;
                    }
                }
            }
            Op::Return => {
                let frame = self.stack.pop()?;
                self.core.reg.restore(frame.registers);
                for (name, prior) in frame.shadowed {
                    self.core.mem.restore_scalar(&name, prior);
                }
                self.pc = frame.return_pc;
            }
            Op::DefFunc => {
                // Definition blocks are only entered through Call.
                let name = inst.name(pc, 0)?;
                self.pc = match self.core.mem.function(name)? {
                    Callable::UserDefined { end, .. } => end + 1,
                    Callable::Builtin { .. } => return Err(VmError::Type(format!("'{}' is not a user function", name))),
                };
            }
            _ => match execute(&mut self.core, inst, pc)? {
                Flow::Next => self.pc = pc + 1,
                Flow::Jump(target) => self.pc = target,
                Flow::Halt => self.halted = true,
                Flow::Patch { name, value } => {
                    syscall::self_patch(&mut self.program, &self.core.mem, &name, value)?;
                    self.pc = pc + 1;
                }
            },
        }
        Ok(())
    }

    /// Builtins run their template inline: no frame, no pc movement.
    fn run_builtin(&mut self, template: &Rc<[Instruction]>, pc: usize) -> VmResult<()> {
        for inst in template.iter() {
            if matches!(inst.op, Op::Call | Op::Return | Op::DefFunc | Op::Jmp | Op::Jmpf) {
                return Err(VmError::IllegalInBuiltin { op: inst.op.mnemonic() });
            }
            match execute(&mut self.core, inst, pc)? {
                Flow::Next => {}
                Flow::Halt => {
                    self.halted = true;
                    return Ok(());
                }
                Flow::Patch { name, value } => {
                    syscall::self_patch(&mut self.program, &self.core.mem, &name, value)?;
                }
                Flow::Jump(_) => return Err(VmError::IllegalInBuiltin { op: "a jump" }),
            }
        }
        Ok(())
    }
}

/// Pre-scan: register every definition block and every builtin. Returns the
/// first instruction past the leading run of definitions.
fn link(program: &Program, stdlib: &Stdlib, mem: &mut ObjectTable) -> Result<usize, LinkError> {
    let code = &program.code;
    let mut entry = 0;
    let mut leading = true;
    let mut pc = 0;

    while pc < code.len() {
        if code[pc].op != Op::DefFunc {
            leading = false;
            pc += 1;
            continue;
        }
        let malformed = LinkError::MalformedDefinition { pc };
        let name = code[pc].operands[0].as_str().ok_or(malformed)?.to_string();
        let arity = match code[pc].operands[1] {
            Value::Integer(a) if a >= 0 => a as usize,
            _ => return Err(LinkError::MalformedDefinition { pc }),
        };

        let mut params = Vec::with_capacity(arity);
        for i in 0..arity {
            match code.get(pc + 1 + i) {
                Some(Instruction { op: Op::MemMov, operands: [Value::String(p), ..] }) => params.push(p.clone()),
                _ => return Err(LinkError::MalformedDefinition { pc }),
            }
        }

        let mut end = pc + 1;
        loop {
            match code.get(end).map(|i| i.op) {
                Some(Op::Return) => break,
                Some(Op::DefFunc) | None => return Err(LinkError::UnterminatedFunction { name }),
                Some(_) => end += 1,
            }
        }

        if stdlib.is_reserved(&name) {
            return Err(LinkError::ReservedFunction { name });
        }
        if mem.has_function(&name) {
            return Err(LinkError::DuplicateFunction { name });
        }
        debug!(function = %name, entry = pc + 1, end, arity, "linked");
        mem.define_function(&name, Callable::UserDefined { entry: pc + 1, end, params: params.into() });

        if leading {
            entry = end + 1;
        }
        pc = end + 1;
    }

    for (name, builtin) in stdlib.iter() {
        mem.define_function(name, Callable::Builtin { template: builtin.template.clone() });
    }
    Ok(entry)
}

/// Binds every `Call` to its callee once. Self-patch rewrites code inside a
/// function's range, never the range itself, so the bindings stay valid.
fn resolve_call_sites(program: &Program, mem: &ObjectTable) -> Vec<Option<Callable>> {
    program
        .code
        .iter()
        .map(|inst| match (inst.op, &inst.operands[0]) {
            (Op::Call, Value::String(name)) => mem.function(name).ok().cloned(),
            _ => None,
        })
        .collect()
}

/// Executes one non-control instruction against registers and memory.
pub(crate) fn execute<S: IoSink>(core: &mut Core<S>, inst: &Instruction, pc: usize) -> VmResult<Flow> {
    let reg = &mut core.reg;
    match inst.op {
        Op::RegSet => {
            let a = inst.reg(pc, 0)?;
            reg.set(a, inst.operands[1].clone());
        }
        Op::RegMov => {
            let (a, b) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?);
            reg.set(a, reg.get(b).clone());
        }
        Op::Ldr => {
            let a = inst.reg(pc, 0)?;
            let value = core.mem.scalar(inst.name(pc, 1)?)?.clone();
            reg.set(a, value);
        }
        Op::Str => {
            let b = inst.reg(pc, 1)?;
            core.mem.set_scalar(inst.name(pc, 0)?, reg.get(b).clone());
        }
        Op::StrInd => {
            let (a, b) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?);
            let name = match reg.get(a) {
                Value::String(s) => s.clone(),
                other => return Err(VmError::Type(format!("set needs a name, got {}", other.type_name()))),
            };
            let value = reg.get(b).clone();
            if matches!(core.mem.function(&name), Ok(Callable::UserDefined { .. })) {
                return Ok(Flow::Patch { name, value });
            }
            core.mem.set_scalar(&name, value);
        }
        Op::MemSet => {
            core.mem.set_scalar(inst.name(pc, 0)?, inst.operands[1].clone());
        }
        Op::MemMov => {
            let value = core.mem.scalar(inst.name(pc, 1)?)?.clone();
            core.mem.set_scalar(inst.name(pc, 0)?, value);
        }
        Op::RslSet => {
            let a = inst.reg(pc, 0)?;
            let value = reg.get(a).clone();
            reg.set_result(value);
        }
        Op::RslMov => {
            let a = inst.reg(pc, 0)?;
            reg.set(a, reg.result().clone());
        }
        Op::Syscall => {
            let code = match inst.operands[0] {
                Value::Integer(code) => code,
                _ => return Err(VmError::Operand { pc, index: 0, expected: "a syscall number" }),
            };
            return syscall::dispatch(core, code);
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
            let op = match inst.op {
                Op::Add => ArithOp::Add,
                Op::Sub => ArithOp::Sub,
                Op::Mul => ArithOp::Mul,
                Op::Div => ArithOp::Div,
                _ => ArithOp::Mod,
            };
            let (a, b, c) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?, inst.reg(pc, 2)?);
            let value = value::arith(op, reg.get(b), reg.get(c))?;
            reg.set(a, value);
        }
        Op::And | Op::Or => {
            let (a, b, c) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?, inst.reg(pc, 2)?);
            let value = if inst.op == Op::And {
                value::logic_and(reg.get(b), reg.get(c))?
            } else {
                value::logic_or(reg.get(b), reg.get(c))?
            };
            reg.set(a, value);
        }
        Op::Not => {
            let (a, b) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?);
            let value = value::logic_not(reg.get(b))?;
            reg.set(a, value);
        }
        Op::CmpEq | Op::CmpNeq => {
            let (a, b, c) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?, inst.reg(pc, 2)?);
            let eq = value::equals(reg.get(b), reg.get(c));
            reg.set(a, Value::Boolean(if inst.op == Op::CmpEq { eq } else { !eq }));
        }
        Op::CmpGt | Op::CmpLt | Op::CmpGte | Op::CmpLte => {
            let op = match inst.op {
                Op::CmpGt => CmpOp::Gt,
                Op::CmpLt => CmpOp::Lt,
                Op::CmpGte => CmpOp::Gte,
                _ => CmpOp::Lte,
            };
            let (a, b, c) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?, inst.reg(pc, 2)?);
            let holds = value::compare(op, reg.get(b), reg.get(c))?;
            reg.set(a, Value::Boolean(holds));
        }
        Op::Brch => {
            let (a, b, c) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?, inst.reg(pc, 2)?);
            let chosen = match reg.get(a) {
                Value::Boolean(true) => reg.get(b).clone(),
                Value::Boolean(false) => reg.get(c).clone(),
                other => return Err(VmError::Type(format!("ifel needs a boolean condition, got {}", other.type_name()))),
            };
            reg.set(a, chosen);
        }
        Op::Jmp => return Ok(Flow::Jump(inst.target(pc, 0)?)),
        Op::Jmpf => {
            let a = inst.reg(pc, 0)?;
            if matches!(reg.get(a), Value::Boolean(false)) {
                return Ok(Flow::Jump(inst.target(pc, 1)?));
            }
        }
        Op::CastInt | Op::CastReal | Op::CastStr => {
            let (a, b) = (inst.reg(pc, 0)?, inst.reg(pc, 1)?);
            let value = match inst.op {
                Op::CastInt => value::to_integer(reg.get(b))?,
                Op::CastReal => value::to_real(reg.get(b))?,
                _ => value::to_string_value(reg.get(b)),
            };
            reg.set(a, value);
        }
        Op::ClearReg => reg.clear(),
        Op::Hlt => return Ok(Flow::Halt),
        Op::Call | Op::Return | Op::DefFunc => {
            return Err(VmError::IllegalInBuiltin { op: inst.op.mnemonic() });
        }
    }
    Ok(Flow::Next)
}

// ── Tests ────────────────────────────────────────────────────────────
