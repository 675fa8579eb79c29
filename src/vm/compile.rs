use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};

use super::{n, r, CompileError, Instruction, Op, Program, Syscall, REGISTER_COUNT, STDOUT};
use crate::ast::{Argument, Ast, Body, Call, FunctionDef, Item};
use crate::source::{Frontend, FsLoader, JsonFrontend, SourceLoader};
use crate::stdlib::{self, Stdlib, ARG_SLOTS};
use crate::value::Value;

type CompileResult<T> = Result<T, CompileError>;

/// Object a caller stores an argument into before calling a user function.
/// The callee's prologue copies it to the parameter's own name.
pub fn param_slot(function: &str, param: &str) -> String {
    format!("{}:{}", function, param)
}

/// Lowers an `Ast` to a flat `Program`.
///
/// Owns the builtin table it compiles against and the collaborators used to
/// expand `include`: a loader for the file text and a frontend that turns it
/// into an `Ast`.
pub struct Compiler {
    stdlib: Stdlib,
    loader: Box<dyn SourceLoader>,
    frontend: Box<dyn Frontend>,
    origin: PathBuf,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// Includes are read from disk as JSON, relative to the working directory.
    pub fn new() -> Self {
        Compiler {
            stdlib: Stdlib::new(),
            loader: Box::new(FsLoader),
            frontend: Box::new(JsonFrontend),
            origin: PathBuf::new(),
        }
    }

    /// `origin` is the path of the file the AST came from; includes resolve
    /// against its directory.
    pub fn with_includes(
        loader: impl SourceLoader + 'static,
        frontend: impl Frontend + 'static,
        origin: impl Into<PathBuf>,
    ) -> Self {
        Compiler {
            stdlib: Stdlib::new(),
            loader: Box::new(loader),
            frontend: Box::new(frontend),
            origin: origin.into(),
        }
    }

    pub fn compile(&self, ast: &Ast) -> CompileResult<Program> {
        let mut items = Vec::with_capacity(ast.items.len());
        let mut active = Vec::new();
        if !self.origin.as_os_str().is_empty() {
            active.push(self.origin.clone());
        }
        self.expand(&ast.items, &self.origin, &mut active, &mut items)?;
        debug!(items = items.len(), "includes expanded");

        let mut codegen = CodeGen::new(&self.stdlib);
        codegen.index(&items)?;
        codegen.generate(&items)?;

        let program = Program { code: codegen.code, register_count: codegen.max_reg.max(ARG_SLOTS) };
        info!(instructions = program.len(), registers = program.register_count, "compiled");
        Ok(program)
    }

    /// Replaces every top-level `include("path")` with the items of the
    /// included file, recursively.
    fn expand(
        &self,
        items: &[Item],
        origin: &Path,
        active: &mut Vec<PathBuf>,
        out: &mut Vec<Item>,
    ) -> CompileResult<()> {
        for item in items {
            let call = match item {
                Item::Call(call) if call.name == "include" => call,
                other => {
                    out.push(other.clone());
                    continue;
                }
            };
            let target = match call.args.as_slice() {
                [Argument::Literal(Value::String(target))] => target,
                _ => return Err(CompileError::IncludeArgument),
            };

            let path = origin.parent().unwrap_or_else(|| Path::new("")).join(target);
            if active.contains(&path) {
                return Err(CompileError::IncludeCycle { path: path.display().to_string() });
            }
            let source = self
                .loader
                .load(&path)
                .map_err(|source| CompileError::IncludeLoad { path: path.display().to_string(), source })?;
            let included = self
                .frontend
                .parse(&source)
                .map_err(|message| CompileError::IncludeParse { path: path.display().to_string(), message })?;
            debug!(path = %path.display(), items = included.items.len(), "include");

            active.push(path.clone());
            self.expand(&included.items, &path, active, out)?;
            active.pop();
        }
        Ok(())
    }
}

/// Compiles with the default collaborators.
pub fn compile(ast: &Ast) -> CompileResult<Program> {
    Compiler::new().compile(ast)
}

// ── Code generation ──────────────────────────────────────────────────

struct CodeGen<'a> {
    stdlib: &'a Stdlib,
    /// Every user function and its parameter names, filled by pass 1.
    functions: HashMap<String, Rc<[String]>>,
    code: Vec<Instruction>,
    next_reg: usize,
    max_reg: usize,
}

impl<'a> CodeGen<'a> {
    fn new(stdlib: &'a Stdlib) -> Self {
        CodeGen {
            stdlib,
            functions: HashMap::new(),
            code: Vec::new(),
            next_reg: ARG_SLOTS,
            max_reg: ARG_SLOTS,
        }
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        let idx = self.code.len();
        self.code.push(inst);
        idx
    }

    /// Points the `JMPF` at `jump_pos` to the next instruction to be emitted.
    fn patch_jump(&mut self, jump_pos: usize) {
        let target = self.code.len();
        self.code[jump_pos].operands[1] = Value::Integer(target as i64);
    }

    fn alloc_reg(&mut self) -> CompileResult<usize> {
        let reg = self.next_reg;
        if reg >= REGISTER_COUNT {
            return Err(CompileError::RegisterOverflow);
        }
        self.next_reg += 1;
        if self.next_reg > self.max_reg {
            self.max_reg = self.next_reg;
        }
        Ok(reg)
    }

    // ── Pass 1 ──

    fn index(&mut self, items: &[Item]) -> CompileResult<()> {
        for item in items {
            if let Item::Define(def) = item {
                if self.stdlib.is_reserved(&def.name) {
                    return Err(CompileError::ReservedName { name: def.name.clone() });
                }
                debug!(function = %def.name, params = def.params.len(), "indexed");
                self.functions.insert(def.name.clone(), def.params.clone().into());
            }
        }
        Ok(())
    }

    // ── Pass 2 ──

    /// Definitions first, in source order, then top-level statements.
    fn generate(&mut self, items: &[Item]) -> CompileResult<()> {
        for item in items {
            if let Item::Define(def) = item {
                self.compile_definition(def)?;
            }
        }
        for item in items {
            match item {
                Item::Define(_) => {}
                Item::Text(text) => {
                    self.emit(Instruction::ab(Op::MemSet, n(STDOUT), Value::String(text.clone())));
                    self.emit(Instruction::a(Op::Syscall, Syscall::IoFlush.immediate()));
                }
                Item::Call(call) => {
                    self.next_reg = ARG_SLOTS;
                    self.compile_call(call, &[])?;
                    self.emit(Instruction::a(Op::Syscall, Syscall::IoFlush.immediate()));
                    self.emit(Instruction::new(Op::ClearReg));
                }
            }
        }
        Ok(())
    }

    fn compile_definition(&mut self, def: &FunctionDef) -> CompileResult<()> {
        self.next_reg = ARG_SLOTS;
        self.emit(Instruction::ab(Op::DefFunc, n(&def.name), Value::Integer(def.params.len() as i64)));
        for param in &def.params {
            self.emit(Instruction::ab(Op::MemMov, n(param), n(&param_slot(&def.name, param))));
        }

        let ret = self.alloc_reg()?;
        match &def.body {
            Body::Value(value) => {
                self.emit(Instruction::ab(Op::RegSet, r(ret), value.clone()));
            }
            Body::Call(call) => {
                self.compile_call(call, &def.params)?;
                self.emit(Instruction::a(Op::RslMov, r(ret)));
            }
        }
        self.emit(Instruction::a(Op::RslSet, r(ret)));
        self.emit(Instruction::new(Op::Return));
        Ok(())
    }

    /// Leaves the value of `arg` in `target`.
    fn compile_argument(&mut self, arg: &Argument, params: &[String], target: usize) -> CompileResult<()> {
        match arg {
            Argument::Literal(value) => {
                self.emit(Instruction::ab(Op::RegSet, r(target), value.clone()));
            }
            Argument::Ref(name) => {
                if params.contains(name) {
                    self.emit(Instruction::ab(Op::Ldr, r(target), n(name)));
                } else if let Some(callee) = self.functions.get(name) {
                    if !callee.is_empty() {
                        return Err(CompileError::ArityMismatch {
                            name: name.clone(),
                            expected: callee.len(),
                            found: 0,
                        });
                    }
                    self.emit(Instruction::a(Op::Call, n(name)));
                    self.emit(Instruction::a(Op::RslMov, r(target)));
                } else if self.stdlib.contains(name) {
                    self.emit(Instruction::ab(Op::RegSet, r(target), stdlib::name_value(name)));
                } else {
                    self.emit(Instruction::ab(Op::Ldr, r(target), n(name)));
                }
            }
            Argument::Call(call) => {
                self.compile_call(call, params)?;
                self.emit(Instruction::a(Op::RslMov, r(target)));
            }
        }
        Ok(())
    }

    /// Leaves the call's value in Result.
    fn compile_call(&mut self, call: &Call, params: &[String]) -> CompileResult<()> {
        match call.name.as_str() {
            "for" => return self.compile_for(call, params),
            "chain" => return self.compile_chain(call, params),
            "include" => return Err(CompileError::IncludeNotTopLevel),
            _ => {}
        }

        let saved = self.next_reg;
        let stdlib = self.stdlib;
        if let Some(entry) = stdlib.get(&call.name) {
            if call.args.len() != entry.arity {
                return Err(CompileError::ArityMismatch {
                    name: call.name.clone(),
                    expected: entry.arity,
                    found: call.args.len(),
                });
            }
            let mut regs = vec![0; call.args.len()];
            for (i, arg) in call.args.iter().enumerate().rev() {
                let reg = self.alloc_reg()?;
                match arg {
                    Argument::Ref(name) if i == 0 && entry.takes_name => {
                        self.emit(Instruction::ab(Op::RegSet, r(reg), Value::String(name.clone())));
                    }
                    _ => self.compile_argument(arg, params, reg)?,
                }
                regs[i] = reg;
            }
            for (slot, reg) in regs.into_iter().enumerate() {
                self.emit(Instruction::ab(Op::RegMov, r(slot), r(reg)));
            }
        } else if let Some(callee) = self.functions.get(&call.name).cloned() {
            if call.args.len() != callee.len() {
                return Err(CompileError::ArityMismatch {
                    name: call.name.clone(),
                    expected: callee.len(),
                    found: call.args.len(),
                });
            }
            let mut regs = Vec::with_capacity(call.args.len());
            for arg in &call.args {
                let reg = self.alloc_reg()?;
                self.compile_argument(arg, params, reg)?;
                regs.push(reg);
            }
            for (param, reg) in callee.iter().zip(regs) {
                self.emit(Instruction::ab(Op::Str, n(&param_slot(&call.name, param)), r(reg)));
            }
        } else {
            return Err(CompileError::UndefinedFunction { name: call.name.clone() });
        }

        self.emit(Instruction::a(Op::Call, n(&call.name)));
        self.next_reg = saved;
        Ok(())
    }

    /// `for(cond, body)`: re-checks `cond` before every pass. Result is the
    /// last value of `body`, or the default value if it never ran.
    fn compile_for(&mut self, call: &Call, params: &[String]) -> CompileResult<()> {
        let [cond, body] = call.args.as_slice() else {
            return Err(CompileError::ControlArity { form: "for", expected: "2", found: call.args.len() });
        };

        let saved = self.next_reg;
        let last = self.alloc_reg()?;
        self.emit(Instruction::ab(Op::RegSet, r(last), Value::default()));

        let loop_start = self.code.len();
        let test = self.alloc_reg()?;
        self.compile_argument(cond, params, test)?;
        let exit = self.emit(Instruction::ab(Op::Jmpf, r(test), Value::Integer(0)));
        self.compile_argument(body, params, last)?;
        self.emit(Instruction::a(Op::Jmp, Value::Integer(loop_start as i64)));
        self.patch_jump(exit);

        self.emit(Instruction::a(Op::RslSet, r(last)));
        self.next_reg = saved;
        Ok(())
    }

    /// `chain(seed, step...)`: threads a value through each step as its
    /// first argument. Every step gets its registers back once it is done.
    fn compile_chain(&mut self, call: &Call, params: &[String]) -> CompileResult<()> {
        let Some((seed, steps)) = call.args.split_first().filter(|(_, steps)| !steps.is_empty()) else {
            return Err(CompileError::ControlArity { form: "chain", expected: "at least 2", found: call.args.len() });
        };

        let outer = self.next_reg;
        let inter = self.alloc_reg()?;
        self.compile_argument(seed, params, inter)?;

        for step in steps {
            let saved = self.next_reg;
            let (name, extra) = match step {
                Argument::Call(step) => (step.name.as_str(), step.args.as_slice()),
                Argument::Ref(name) => (name.as_str(), &[][..]),
                Argument::Literal(value) => return Err(CompileError::ChainStep { found: value.to_string() }),
            };
            if stdlib::CONTROL_FORMS.contains(&name) {
                return Err(CompileError::ChainStep { found: name.to_string() });
            }

            let stdlib = self.stdlib;
            if let Some(entry) = stdlib.get(name) {
                if extra.len() + 1 != entry.arity {
                    return Err(CompileError::ArityMismatch {
                        name: name.to_string(),
                        expected: entry.arity,
                        found: extra.len() + 1,
                    });
                }
                let mut regs = vec![0; extra.len()];
                for (i, arg) in extra.iter().enumerate().rev() {
                    let reg = self.alloc_reg()?;
                    self.compile_argument(arg, params, reg)?;
                    regs[i] = reg;
                }
                self.emit(Instruction::ab(Op::RegMov, r(0), r(inter)));
                for (i, reg) in regs.into_iter().enumerate() {
                    self.emit(Instruction::ab(Op::RegMov, r(i + 1), r(reg)));
                }
            } else if let Some(callee) = self.functions.get(name).cloned() {
                if extra.len() + 1 != callee.len() {
                    return Err(CompileError::ArityMismatch {
                        name: name.to_string(),
                        expected: callee.len(),
                        found: extra.len() + 1,
                    });
                }
                let mut regs = vec![inter];
                for arg in extra {
                    let reg = self.alloc_reg()?;
                    self.compile_argument(arg, params, reg)?;
                    regs.push(reg);
                }
                for (param, reg) in callee.iter().zip(regs) {
                    self.emit(Instruction::ab(Op::Str, n(&param_slot(name, param)), r(reg)));
                }
            } else {
                return Err(CompileError::UndefinedFunction { name: name.to_string() });
            }

            self.emit(Instruction::a(Op::Call, n(name)));
            self.emit(Instruction::a(Op::RslMov, r(inter)));
            self.next_reg = saved;
        }

        self.emit(Instruction::a(Op::RslSet, r(inter)));
        self.next_reg = outer;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Vm, VmError};

    fn lit(v: impl Into<Value>) -> Argument {
        Argument::lit(v)
    }

    fn var(name: &str) -> Argument {
        Argument::var(name)
    }

    fn call(name: &str, args: Vec<Argument>) -> Argument {
        Argument::call(name, args)
    }

    fn stmt(name: &str, args: Vec<Argument>) -> Item {
        Call::new(name, args).into()
    }

    fn print(arg: Argument) -> Item {
        stmt("print", vec![arg])
    }

    fn run(items: Vec<Item>) -> Vm {
        let program = compile(&Ast::new(items)).unwrap();
        let mut vm = Vm::new(program).unwrap();
        vm.run().unwrap();
        vm
    }

    fn output(items: Vec<Item>) -> String {
        run(items).output()
    }

    fn compile_err(items: Vec<Item>) -> CompileError {
        compile(&Ast::new(items)).unwrap_err()
    }

    #[test]
    fn text_and_print_interleave() {
        let out = output(vec![Item::Text("a".into()), print(lit(1)), Item::Text("b".into())]);
        assert_eq!(out, "a1b");
    }

    #[test]
    fn literals_render() {
        assert_eq!(output(vec![print(lit(42))]), "42");
        assert_eq!(output(vec![print(lit(-7))]), "-7");
        assert_eq!(output(vec![print(lit(1.5))]), "1.5");
        assert_eq!(output(vec![print(lit(2.0))]), "2");
        assert_eq!(output(vec![print(lit(true))]), "!t");
        assert_eq!(output(vec![print(lit(false))]), "!f");
        assert_eq!(output(vec![print(lit("as is"))]), "as is");
    }

    #[test]
    fn add_follows_coercion_lattice() {
        assert_eq!(output(vec![print(call("add", vec![lit(2), lit(3)]))]), "5");
        assert_eq!(output(vec![print(call("add", vec![lit(1), lit(0.5)]))]), "1.5");
        assert_eq!(output(vec![print(call("add", vec![lit("n="), lit(3)]))]), "n=3");
    }

    #[test]
    fn builtin_arguments_keep_their_order() {
        assert_eq!(output(vec![print(call("sub", vec![lit(10), lit(3)]))]), "7");
        assert_eq!(output(vec![print(call("ifel", vec![lit(false), lit("yes"), lit("no")]))]), "no");
        let substr = call("substr", vec![lit("cutter"), lit(2), lit(3)]);
        assert_eq!(output(vec![print(substr)]), "tte");
    }

    #[test]
    fn definitions_are_hoisted() {
        let program = compile(&Ast::new(vec![
            Item::Text("x".into()),
            FunctionDef::value("one", 1).into(),
        ]))
        .unwrap();
        assert_eq!(program.code[0].op, Op::DefFunc);
        assert_eq!(program.code[3].op, Op::Return);
        assert_eq!(program.code[4].op, Op::MemSet);
    }

    #[test]
    fn top_level_call_flushes_and_clears() {
        let program = compile(&Ast::new(vec![print(lit(1))])).unwrap();
        let tail: Vec<Op> = program.code.iter().rev().take(2).map(|i| i.op).collect();
        assert_eq!(tail, vec![Op::ClearReg, Op::Syscall]);
    }

    #[test]
    fn forward_references_are_symmetric() {
        let f = FunctionDef::call("f", &["x"], Call::new("g", vec![var("x")]));
        let g = FunctionDef::call("g", &["y"], Call::new("add", vec![var("y"), lit(1)]));
        let use_f = print(call("f", vec![lit(41)]));

        let forward = output(vec![f.clone().into(), g.clone().into(), use_f.clone()]);
        let backward = output(vec![g.into(), f.into(), use_f]);
        assert_eq!(forward, "42");
        assert_eq!(forward, backward);
    }

    #[test]
    fn mutually_calling_definitions_work_in_either_order() {
        // od(m) = for(m > 0, m = print(m) * ev(m - 1))
        // ev(k) = for(k > 0, k = print(0 - k) * od(k - 1))
        let od_body = call(
            "set",
            vec![var("m"), call("mul", vec![call("print", vec![var("m")]), call("ev", vec![call("sub", vec![var("m"), lit(1)])])])],
        );
        let ev_body = call(
            "set",
            vec![
                var("k"),
                call(
                    "mul",
                    vec![call("print", vec![call("sub", vec![lit(0), var("k")])]), call("od", vec![call("sub", vec![var("k"), lit(1)])])],
                ),
            ],
        );
        let od = FunctionDef::call("od", &["m"], Call::new("for", vec![call("gt", vec![var("m"), lit(0)]), od_body]));
        let ev = FunctionDef::call("ev", &["k"], Call::new("for", vec![call("gt", vec![var("k"), lit(0)]), ev_body]));
        let start = stmt("od", vec![lit(3)]);

        let od_first = run(vec![od.clone().into(), ev.clone().into(), start.clone()]);
        let ev_first = run(vec![ev.into(), od.into(), start]);
        assert_eq!(od_first.output(), "1-23");
        assert_eq!(od_first.output(), ev_first.output());
        assert!(od_first.call_stack().is_empty());
        assert!(ev_first.call_stack().is_empty());
    }

    #[test]
    fn zero_arg_function_reference_calls_it() {
        let out = output(vec![
            FunctionDef::value("greeting", "hello").into(),
            print(call("concat", vec![var("greeting"), lit("!")])),
        ]);
        assert_eq!(out, "hello!");
    }

    #[test]
    fn for_runs_while_condition_holds() {
        // flag = (count += 1) < 3
        let bump = call("set", vec![var("count"), call("add", vec![var("count"), lit(1)])]);
        let body = call("set", vec![var("flag"), call("lt", vec![bump, lit(3)])]);
        let vm = run(vec![
            stmt("set", vec![var("flag"), lit(true)]),
            stmt("set", vec![var("count"), lit(0)]),
            stmt("for", vec![var("flag"), body]),
        ]);
        assert_eq!(vm.objects().scalar("count").unwrap(), &Value::Integer(3));
        assert_eq!(vm.result(), &Value::Boolean(false));
    }

    #[test]
    fn for_with_false_condition_never_runs() {
        let vm = run(vec![
            stmt("set", vec![var("go"), lit(false)]),
            stmt("for", vec![var("go"), call("print", vec![lit("never")])]),
        ]);
        assert_eq!(vm.output(), "");
        assert_eq!(vm.result(), &Value::Integer(0));
    }

    #[test]
    fn for_arity_is_checked() {
        let err = compile_err(vec![stmt("for", vec![lit(true)])]);
        assert!(matches!(err, CompileError::ControlArity { form: "for", found: 1, .. }));
    }

    #[test]
    fn chain_matches_nested_calls() {
        let chained = output(vec![print(call(
            "chain",
            vec![lit(5), call("add", vec![lit(3)]), call("sub", vec![lit(2)])],
        ))]);
        let nested = output(vec![print(call(
            "sub",
            vec![call("add", vec![lit(5), lit(3)]), lit(2)],
        ))]);
        assert_eq!(chained, "6");
        assert_eq!(chained, nested);
    }

    #[test]
    fn chain_accepts_bare_names_and_user_functions() {
        let twice = FunctionDef::call("twice", &["v"], Call::new("mul", vec![var("v"), lit(2)]));
        let out = output(vec![
            twice.into(),
            print(call("chain", vec![lit(5), var("twice"), call("add", vec![lit(1)])])),
            print(call("chain", vec![lit(true), var("not")])),
        ]);
        assert_eq!(out, "11!f");
    }

    #[test]
    fn chain_register_use_is_independent_of_length() {
        let registers = |steps: usize| {
            let mut args = vec![lit(1)];
            args.extend((0..steps).map(|_| call("add", vec![call("mul", vec![lit(2), lit(3)])])));
            compile(&Ast::new(vec![print(call("chain", args))])).unwrap().register_count
        };
        assert_eq!(registers(1), registers(10));
        assert_eq!(registers(1), registers(50));
    }

    #[test]
    fn chain_rejects_bad_steps() {
        let err = compile_err(vec![stmt("chain", vec![lit(1)])]);
        assert!(matches!(err, CompileError::ControlArity { form: "chain", .. }));

        let err = compile_err(vec![stmt("chain", vec![lit(1), lit(2)])]);
        assert!(matches!(err, CompileError::ChainStep { .. }));

        let err = compile_err(vec![stmt("chain", vec![lit(1), var("add")])]);
        assert!(matches!(err, CompileError::ArityMismatch { expected: 2, found: 1, .. }));

        let err = compile_err(vec![stmt("chain", vec![lit(1), call("add", vec![lit(1), lit(2)])])]);
        assert!(matches!(err, CompileError::ArityMismatch { expected: 2, found: 3, .. }));
    }

    #[test]
    fn set_redefines_value_function_before_first_call() {
        let out = output(vec![
            FunctionDef::value("limit", 1).into(),
            stmt("set", vec![var("limit"), lit(99)]),
            print(var("limit")),
            print(var("limit")),
        ]);
        assert_eq!(out, "9999");
    }

    #[test]
    fn set_after_call_changes_later_calls_only() {
        let out = output(vec![
            FunctionDef::value("limit", 1).into(),
            print(var("limit")),
            stmt("set", vec![var("limit"), lit(5)]),
            print(var("limit")),
        ]);
        assert_eq!(out, "15");
    }

    #[test]
    fn set_on_function_with_params_faults() {
        let program = compile(&Ast::new(vec![
            FunctionDef::call("id", &["x"], Call::new("add", vec![var("x"), lit(0)])).into(),
            stmt("set", vec![var("id"), lit(1)]),
        ]))
        .unwrap();
        let mut vm = Vm::new(program).unwrap();
        assert!(matches!(vm.run(), Err(VmError::Patch { .. })));
    }

    #[test]
    fn recursion_restores_parameters() {
        // down(n) = for(n > 0, n = print(n) * down(n - 1)), printing on the way back up
        let recurse = call("down", vec![call("sub", vec![var("n"), lit(1)])]);
        let body = call("set", vec![var("n"), call("mul", vec![call("print", vec![var("n")]), recurse])]);
        let down = FunctionDef::call("down", &["n"], Call::new("for", vec![call("gt", vec![var("n"), lit(0)]), body]));
        let vm = run(vec![down.into(), stmt("down", vec![lit(3)])]);
        assert_eq!(vm.output(), "123");
        assert!(vm.objects().scalar("n").is_err());
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn name_taking_builtins_use_the_name() {
        let out = output(vec![
            stmt("arrpush", vec![var("xs"), lit("a")]),
            stmt("arrpush", vec![var("xs"), lit("b")]),
            print(call("arrlen", vec![var("xs")])),
            print(call("arrget", vec![var("xs"), lit(1)])),
        ]);
        assert_eq!(out, "2b");
    }

    #[test]
    fn builtin_names_are_values() {
        assert_eq!(output(vec![print(var("add"))]), "add");
    }

    #[test]
    fn exit_halts_after_flush() {
        let out = output(vec![print(lit(1)), stmt("exit", vec![]), print(lit(2))]);
        assert_eq!(out, "1");
    }

    #[test]
    fn unknown_object_is_runtime_fault() {
        let program = compile(&Ast::new(vec![print(var("ghost"))])).unwrap();
        let mut vm = Vm::new(program).unwrap();
        assert!(matches!(vm.run(), Err(VmError::UndefinedObject { .. })));
    }

    #[test]
    fn undefined_function_is_compile_error() {
        let err = compile_err(vec![print(call("nope", vec![lit(1)]))]);
        assert!(matches!(err, CompileError::UndefinedFunction { ref name } if name == "nope"));
    }

    #[test]
    fn redefining_builtin_is_rejected() {
        let err = compile_err(vec![FunctionDef::value("add", 1).into()]);
        assert!(matches!(err, CompileError::ReservedName { .. }));
        let err = compile_err(vec![FunctionDef::value("chain", 1).into()]);
        assert!(matches!(err, CompileError::ReservedName { .. }));
    }

    #[test]
    fn arity_mismatches_are_rejected() {
        let err = compile_err(vec![print(call("add", vec![lit(1)]))]);
        assert!(matches!(err, CompileError::ArityMismatch { expected: 2, found: 1, .. }));

        let f = FunctionDef::call("f", &["x"], Call::new("add", vec![var("x"), lit(1)]));
        let err = compile_err(vec![f.clone().into(), print(call("f", vec![lit(1), lit(2)]))]);
        assert!(matches!(err, CompileError::ArityMismatch { expected: 1, found: 2, .. }));

        let err = compile_err(vec![f.into(), print(var("f"))]);
        assert!(matches!(err, CompileError::ArityMismatch { expected: 1, found: 0, .. }));
    }

    // ── Includes ──

    struct MapLoader(HashMap<PathBuf, String>);

    impl SourceLoader for MapLoader {
        fn load(&self, path: &Path) -> std::io::Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string()))
        }
    }

    fn with_files(files: &[(&str, &str)]) -> Compiler {
        let map = files.iter().map(|(p, s)| (PathBuf::from(p), s.to_string())).collect();
        Compiler::with_includes(MapLoader(map), JsonFrontend, "lib/main.json")
    }

    fn include(path: &str) -> Item {
        stmt("include", vec![lit(path)])
    }

    #[test]
    fn include_splices_definitions() {
        let compiler = with_files(&[(
            "lib/greet.json",
            r#"{"items":[{"Define":{"name":"greeting","body":{"Value":{"String":"hi"}}}},{"Text":"["}]}"#,
        )]);
        let program = compiler
            .compile(&Ast::new(vec![include("greet.json"), print(var("greeting"))]))
            .unwrap();
        let mut vm = Vm::new(program).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.output(), "[hi");
    }

    #[test]
    fn include_resolves_relative_to_including_file() {
        let compiler = with_files(&[
            ("lib/a.json", r#"{"items":[{"Call":{"name":"include","args":[{"Literal":{"String":"sub/b.json"}}]}}]}"#),
            ("lib/sub/b.json", r#"{"items":[{"Call":{"name":"include","args":[{"Literal":{"String":"c.json"}}]}}]}"#),
            ("lib/sub/c.json", r#"{"items":[{"Text":"deep"}]}"#),
        ]);
        let program = compiler.compile(&Ast::new(vec![include("a.json")])).unwrap();
        let mut vm = Vm::new(program).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.output(), "deep");
    }

    #[test]
    fn include_errors() {
        let compiler = with_files(&[
            ("lib/loop.json", r#"{"items":[{"Call":{"name":"include","args":[{"Literal":{"String":"loop.json"}}]}}]}"#),
            ("lib/bad.json", "not json"),
        ]);
        let compile = |items| compiler.compile(&Ast::new(items)).unwrap_err();

        assert!(matches!(compile(vec![include("loop.json")]), CompileError::IncludeCycle { .. }));
        assert!(matches!(compile(vec![include("bad.json")]), CompileError::IncludeParse { .. }));
        assert!(matches!(compile(vec![include("missing.json")]), CompileError::IncludeLoad { .. }));
        assert!(matches!(compile(vec![stmt("include", vec![lit(1)])]), CompileError::IncludeArgument));
        assert!(matches!(
            compile(vec![stmt("include", vec![lit("a"), lit("b")])]),
            CompileError::IncludeArgument
        ));
        assert!(matches!(
            compile(vec![print(call("include", vec![lit("x.json")]))]),
            CompileError::IncludeNotTopLevel
        ));
    }
}
