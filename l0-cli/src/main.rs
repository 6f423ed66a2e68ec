use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use l0_compiler::{render, runtime, CompileOptions, Compiler, Diagnostic};

/// L0 stage-1 compiler driver: compiles an entry module and its imports
/// into a single C99 translation unit.
#[derive(Parser)]
#[command(
    name = "l0c",
    version,
    about = "Compile L0 modules to C99.",
    long_about = "Compile an L0 entry module and its transitive imports into one C99 \
                  translation unit. Diagnostics are printed to stderr; the exit code is \
                  nonzero when any error was reported."
)]
struct Cli {
    /// Entry module name (dotted), e.g. `app.main`.
    entry: String,

    /// Project source root (repeatable). Searched after system roots.
    #[arg(long = "project-root", value_name = "DIR")]
    project_roots: Vec<PathBuf>,

    /// System source root (repeatable). Searched before project roots.
    #[arg(long = "system-root", value_name = "DIR")]
    system_roots: Vec<PathBuf>,

    /// Write the generated C here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Do not emit #line directives in the generated C.
    #[arg(long)]
    no_line_directives: bool,

    /// Enable ARC tracing in the generated program (L0_TRACE_ARC).
    #[arg(long)]
    trace_arc: bool,

    /// Enable memory tracing in the generated program (L0_TRACE_MEMORY).
    #[arg(long)]
    trace_memory: bool,

    /// Also write the runtime headers next to the output file.
    #[arg(long)]
    emit_runtime: bool,
}

fn print_diagnostic(diagnostic: &Diagnostic, source_cache: &mut HashMap<PathBuf, String>) {
    let source = diagnostic.file.as_ref().and_then(|path| {
        if !source_cache.contains_key(path) {
            if let Ok(text) = fs::read_to_string(path) {
                source_cache.insert(path.clone(), text);
            }
        }
        source_cache.get(path).map(String::as_str)
    });
    eprintln!("{}", render(diagnostic, source));
}

fn run(cli: Cli) -> Result<bool> {
    let options = CompileOptions {
        system_roots: cli.system_roots.clone(),
        project_roots: if cli.project_roots.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            cli.project_roots.clone()
        },
        module_overrides: HashMap::new(),
        emit_line_directives: !cli.no_line_directives,
        trace_arc: cli.trace_arc,
        trace_memory: cli.trace_memory,
    };

    let compiler = Compiler::new(options);
    let compilation = compiler.compile(&cli.entry);

    let mut source_cache = HashMap::new();
    for diagnostic in compilation.analysis.diagnostics.entries() {
        print_diagnostic(diagnostic, &mut source_cache);
    }

    if compilation.had_errors {
        return Ok(false);
    }

    match &cli.output {
        Some(path) => {
            fs::write(path, &compilation.c_source)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if cli.emit_runtime {
                let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| ".".into());
                runtime::write_runtime_headers(&dir)
                    .with_context(|| format!("failed to write runtime headers to '{}'", dir.display()))?;
            }
        }
        None => {
            print!("{}", compilation.c_source);
            if cli.emit_runtime {
                runtime::write_runtime_headers(std::path::Path::new("."))
                    .context("failed to write runtime headers")?;
            }
        }
    }

    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("l0c: {error:#}");
            ExitCode::FAILURE
        }
    }
}
