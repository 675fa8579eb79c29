//! Compiler and virtual machine for the cutter template language.
//!
//! An external parser produces an [`Ast`]; [`vm::compile`] lowers it to a flat
//! [`Program`]; a [`Vm`] links and runs the program, writing output through
//! an [`vm::IoSink`].

pub mod ast;
pub mod diagnostic;
pub mod source;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use ast::Ast;
pub use value::Value;
pub use vm::{compile, Compiler, Program, Vm};

use diagnostic::Diagnostic;
use vm::{CompileError, LinkError, VmError};

/// Any failure between an AST and its output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Runtime(#[from] VmError),
}

impl From<&Error> for Diagnostic {
    fn from(e: &Error) -> Self {
        match e {
            Error::Compile(e) => Diagnostic::from(e),
            Error::Link(e) => Diagnostic::from(e),
            Error::Runtime(e) => Diagnostic::from(e),
        }
    }
}

/// Compiles and runs `ast` in a fresh VM, returning everything it printed.
pub fn run(ast: &Ast) -> Result<String, Error> {
    let program = compile(ast)?;
    let mut vm = Vm::new(program)?;
    vm.run()?;
    Ok(vm.output())
}
