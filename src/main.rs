use std::fs::File;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use cutter::diagnostic::{ansi::AnsiRenderer, json, registry, Diagnostic};
use cutter::source::{Frontend, FsLoader, JsonFrontend};
use cutter::vm::{disasm, BufferedSink, Compiler, Vm};

#[derive(Parser, Debug)]
#[command(name = "cutter", version, about = "Compile and run cutter programs")]
struct Cli {
    /// Program to run, as a JSON syntax tree
    #[arg(required_unless_present = "explain")]
    file: Option<PathBuf>,

    /// Print the compiled program instead of running it
    #[arg(long)]
    disasm: bool,

    /// Print registers and objects to stderr after the run
    #[arg(long)]
    dump_state: bool,

    /// Write program output to PATH instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Report errors as JSON lines
    #[arg(long)]
    json: bool,

    /// Explain an error code, e.g. CUT-C008
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,
}

/// `RUST_LOG` overrides the default `warn` filter. Logs go to stderr so
/// program output stays clean.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    if let Some(code) = &cli.explain {
        return match registry::lookup(code) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("unknown error code: {}", code);
                ExitCode::FAILURE
            }
        };
    }

    let Some(path) = cli.file.as_deref() else {
        return ExitCode::FAILURE;
    };
    match run(&cli, path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            report(&cli, &d.with_file(path.display().to_string()));
            ExitCode::FAILURE
        }
    }
}

fn report(cli: &Cli, d: &Diagnostic) {
    if cli.json {
        eprintln!("{}", json::render(d));
    } else {
        let use_color = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        eprint!("{}", AnsiRenderer { use_color }.render(d));
    }
}

fn run(cli: &Cli, path: &Path) -> Result<(), Diagnostic> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| Diagnostic::error(format!("cannot read {}: {}", path.display(), e)))?;
    let ast = JsonFrontend
        .parse(&source)
        .map_err(|e| Diagnostic::error(format!("cannot parse {}: {}", path.display(), e)))?;
    debug!(items = ast.items.len(), "parsed");

    let program = Compiler::with_includes(FsLoader, JsonFrontend, path)
        .compile(&ast)
        .map_err(|e| Diagnostic::from(&e))?;

    if cli.disasm {
        print!("{}", disasm::disassemble(&program));
        return Ok(());
    }

    let out: Box<dyn Write> = match &cli.output {
        Some(target) => Box::new(
            File::create(target)
                .map_err(|e| Diagnostic::error(format!("cannot create {}: {}", target.display(), e)))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut vm = Vm::with_sink(program, BufferedSink::new(out)).map_err(|e| Diagnostic::from(&e))?;
    let result = vm.run();
    if cli.dump_state {
        eprint!("{}", disasm::dump_state(&vm));
    }
    result.map_err(|e| Diagnostic::from(&e))
}
