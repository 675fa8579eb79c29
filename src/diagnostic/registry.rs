/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,  // brief description for --explain headers
    pub long: &'static str,   // full explanation for --explain
}

/// All stable error codes. `C` compile, `L` link, `R` runtime.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Compile ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "CUT-C001",
        short: "include needs one string literal",
        long: r#"## CUT-C001: include needs one string literal

`include` takes exactly one argument, a string literal naming the file to
splice in. Variables and nested calls are not allowed because includes are
expanded before anything runs.

**Example that triggers this:**

    @include(path)

**Fix:**

    @include("lib/common.cut")
"#,
    },
    ErrorEntry {
        code: "CUT-C002",
        short: "include below top level",
        long: r#"## CUT-C002: include below top level

`include` may only appear as a statement of its own at the top of a file.
It cannot be an argument or part of a function body.
"#,
    },
    ErrorEntry {
        code: "CUT-C003",
        short: "include file unreadable",
        long: r#"## CUT-C003: include file unreadable

The file named by an `include` could not be read. Paths are resolved
relative to the directory of the file that contains the `include`.
"#,
    },
    ErrorEntry {
        code: "CUT-C004",
        short: "include file does not parse",
        long: r#"## CUT-C004: include file does not parse

The included file was read but could not be turned into a syntax tree.
The message carries the parser's own error.
"#,
    },
    ErrorEntry {
        code: "CUT-C005",
        short: "include cycle",
        long: r#"## CUT-C005: include cycle

A file includes itself, directly or through other includes.
"#,
    },
    ErrorEntry {
        code: "CUT-C006",
        short: "wrong number of arguments to a control form",
        long: r#"## CUT-C006: wrong number of arguments to a control form

`for` takes exactly two arguments, a condition and a body.
`chain` takes a seed and at least one step.

    @for(running, step())
    @chain(5, add(1), twice)
"#,
    },
    ErrorEntry {
        code: "CUT-C007",
        short: "chain step is not callable",
        long: r#"## CUT-C007: chain step is not callable

Every argument to `chain` after the seed must be a call, such as `add(1)`,
or the bare name of a function, such as `twice`. Literals are rejected.
"#,
    },
    ErrorEntry {
        code: "CUT-C008",
        short: "arity mismatch",
        long: r#"## CUT-C008: arity mismatch

A function was called with a different number of arguments than it takes.
In a `chain` step the running value counts as the first argument.
"#,
    },
    ErrorEntry {
        code: "CUT-C009",
        short: "undefined function",
        long: r#"## CUT-C009: undefined function

A call names a function that is neither a builtin nor defined anywhere in
the program or its includes.
"#,
    },
    ErrorEntry {
        code: "CUT-C010",
        short: "builtin name redefined",
        long: r#"## CUT-C010: builtin name redefined

Builtins and the control forms `for`, `chain` and `include` cannot be
redefined. Choose another name for the function.
"#,
    },
    ErrorEntry {
        code: "CUT-C011",
        short: "too many registers",
        long: r#"## CUT-C011: too many registers

A single statement needs more than 1024 registers. Split deeply nested
expressions into separate definitions.
"#,
    },
    // ── Link ──────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "CUT-L001",
        short: "function defined twice",
        long: r#"## CUT-L001: function defined twice

Two definitions share a name. Each function may be defined once; use
`set` to change a value function at run time.
"#,
    },
    ErrorEntry {
        code: "CUT-L002",
        short: "builtin defined in program",
        long: r#"## CUT-L002: builtin defined in program

The program contains a definition block for a builtin name. Programs
from the compiler never do this; the program was assembled by hand.
"#,
    },
    ErrorEntry {
        code: "CUT-L003",
        short: "definition without return",
        long: r#"## CUT-L003: definition without return

A definition block has no return instruction before the next definition
or the end of the program.
"#,
    },
    ErrorEntry {
        code: "CUT-L004",
        short: "malformed definition",
        long: r#"## CUT-L004: malformed definition

A definition marker has a bad name or arity operand, or fewer parameter
bindings than its arity says.
"#,
    },
    // ── Runtime ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "CUT-R001",
        short: "undefined function at run time",
        long: r#"## CUT-R001: undefined function at run time

A call instruction named a function that is not in the function table.
"#,
    },
    ErrorEntry {
        code: "CUT-R002",
        short: "undefined object",
        long: r#"## CUT-R002: undefined object

A name was read before anything was stored under it.

**Fix:**

    @set(count, 0)
"#,
    },
    ErrorEntry {
        code: "CUT-R003",
        short: "undefined array",
        long: r#"## CUT-R003: undefined array

An array builtin was given a name with no array behind it. Create it
with `arrmake` or `arrpush` first.
"#,
    },
    ErrorEntry {
        code: "CUT-R004",
        short: "call stack underflow",
        long: r#"## CUT-R004: call stack underflow

A return instruction ran with no call in flight.
"#,
    },
    ErrorEntry {
        code: "CUT-R005",
        short: "bad operand",
        long: r#"## CUT-R005: bad operand

An instruction operand had the wrong kind, for example a name where a
register index belongs. This indicates a malformed program.
"#,
    },
    ErrorEntry {
        code: "CUT-R006",
        short: "type error",
        long: r#"## CUT-R006: type error

An operation got values of types it cannot combine, such as ordering a
number against a string or `and` on a non-boolean.
"#,
    },
    ErrorEntry {
        code: "CUT-R007",
        short: "division by zero",
        long: r#"## CUT-R007: division by zero

`div` or `mod` was given an integer zero divisor.
"#,
    },
    ErrorEntry {
        code: "CUT-R008",
        short: "array index out of range",
        long: r#"## CUT-R008: array index out of range

`arrget` or `arrset` used an index below zero or past the last element.
"#,
    },
    ErrorEntry {
        code: "CUT-R009",
        short: "builtin argument error",
        long: r#"## CUT-R009: builtin argument error

A string, array or system builtin rejected its arguments, for example a
substring range past the end or an invalid regular expression.
"#,
    },
    ErrorEntry {
        code: "CUT-R010",
        short: "unknown syscall",
        long: r#"## CUT-R010: unknown syscall

A syscall instruction carried a number the VM does not know.
"#,
    },
    ErrorEntry {
        code: "CUT-R011",
        short: "cannot redefine function",
        long: r#"## CUT-R011: cannot redefine function

`set` on a function only works for functions without parameters. The
function's body is replaced so that it returns the new value.
"#,
    },
    ErrorEntry {
        code: "CUT-R012",
        short: "control flow inside a builtin",
        long: r#"## CUT-R012: control flow inside a builtin

A builtin template contained a call, return or jump.
"#,
    },
    ErrorEntry {
        code: "CUT-R013",
        short: "output error",
        long: r#"## CUT-R013: output error

Writing program output failed.
"#,
    },
];

/// Look up an error entry by code (e.g. `"CUT-C008"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostic;
    use crate::vm::{CompileError, LinkError, VmError};

    #[test]
    fn lookup_known_code() {
        let e = lookup("CUT-C008").expect("CUT-C008 should be in registry");
        assert_eq!(e.code, "CUT-C008");
        assert!(!e.short.is_empty());
        assert!(e.long.contains("CUT-C008"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("CUT-XXXX").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn all_codes_have_content() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.starts_with(&format!("## {}", entry.code)), "{} has a bad header", entry.code);
        }
    }

    #[test]
    fn emitted_codes_are_registered() {
        let samples = [
            Diagnostic::from(&CompileError::IncludeArgument),
            Diagnostic::from(&CompileError::RegisterOverflow),
            Diagnostic::from(&CompileError::ReservedName { name: "add".into() }),
            Diagnostic::from(&LinkError::MalformedDefinition { pc: 0 }),
            Diagnostic::from(&VmError::CallStackUnderflow),
            Diagnostic::from(&VmError::Io(std::io::Error::other("closed"))),
            Diagnostic::from(&VmError::IllegalInBuiltin { op: "JMP" }),
        ];
        for d in samples {
            let code = d.code.expect("every error carries a code");
            assert!(lookup(code).is_some(), "{code} missing from registry");
        }
    }
}
