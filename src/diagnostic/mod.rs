pub mod ansi;
pub mod json;
pub mod registry;

use crate::vm::{CompileError, LinkError, VmError};

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    /// Stable code from the registry, e.g. `CUT-C008`.
    pub code: Option<&'static str>,
    /// File the failing program was loaded from.
    pub file: Option<String>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            code: None,
            file: None,
            notes: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// ---- From impls for the pipeline's error types ----

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e {
            CompileError::IncludeArgument => "CUT-C001",
            CompileError::IncludeNotTopLevel => "CUT-C002",
            CompileError::IncludeLoad { .. } => "CUT-C003",
            CompileError::IncludeParse { .. } => "CUT-C004",
            CompileError::IncludeCycle { .. } => "CUT-C005",
            CompileError::ControlArity { .. } => "CUT-C006",
            CompileError::ChainStep { .. } => "CUT-C007",
            CompileError::ArityMismatch { .. } => "CUT-C008",
            CompileError::UndefinedFunction { .. } => "CUT-C009",
            CompileError::ReservedName { .. } => "CUT-C010",
            CompileError::RegisterOverflow => "CUT-C011",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            CompileError::IncludeArgument => d.with_suggestion("write it as include(\"path/to/file\")"),
            CompileError::IncludeNotTopLevel => {
                d.with_note("includes are expanded before compilation, so they cannot produce a value")
            }
            CompileError::ReservedName { .. } => d.with_suggestion("pick a name that is not a builtin"),
            CompileError::ChainStep { .. } => d.with_note("each step after the seed must be a call or a function name"),
            CompileError::RegisterOverflow => d.with_suggestion("split the expression into smaller definitions"),
            _ => d,
        }
    }
}

impl From<&LinkError> for Diagnostic {
    fn from(e: &LinkError) -> Self {
        let code = match e {
            LinkError::DuplicateFunction { .. } => "CUT-L001",
            LinkError::ReservedFunction { .. } => "CUT-L002",
            LinkError::UnterminatedFunction { .. } => "CUT-L003",
            LinkError::MalformedDefinition { .. } => "CUT-L004",
        };
        Diagnostic::error(e.to_string()).with_code(code)
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let code = match e {
            VmError::UndefinedFunction { .. } => "CUT-R001",
            VmError::UndefinedObject { .. } => "CUT-R002",
            VmError::UndefinedArray { .. } => "CUT-R003",
            VmError::CallStackUnderflow => "CUT-R004",
            VmError::Operand { .. } => "CUT-R005",
            VmError::Type(_) => "CUT-R006",
            VmError::DivisionByZero => "CUT-R007",
            VmError::IndexOutOfRange { .. } => "CUT-R008",
            VmError::Syscall { .. } => "CUT-R009",
            VmError::UnknownSyscall { .. } => "CUT-R010",
            VmError::Patch { .. } => "CUT-R011",
            VmError::IllegalInBuiltin { .. } => "CUT-R012",
            VmError::Io(_) => "CUT-R013",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            VmError::UndefinedObject { .. } => d.with_suggestion("assign it first with set(name, value)"),
            VmError::UndefinedArray { .. } => d.with_suggestion("create it with arrmake(name) or arrpush(name, value)"),
            VmError::Patch { .. } => d.with_note("only functions without parameters can be redefined with set"),
            _ => d,
        }
    }
}
