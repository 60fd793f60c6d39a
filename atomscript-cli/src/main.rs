//! atomscript CLI: compile, check, render, and run scripts.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use atomscript_core::compiler::{compile_with_sink, CompileOptions};
use atomscript_core::context::{CommandSink, MemoryStore, TableModel};
use atomscript_core::error::{Diagnostic, DiagnosticsSink};
use atomscript_core::program::Link;
use atomscript_core::value::Var;
use atomscript_core::walker::Walker;
use atomscript_core::CompiledProgram;

#[derive(Parser)]
#[command(
    version,
    about = "atomscript \u{2014} molecular visualization script compiler"
)]
struct Cli {
    /// Script file to compile (stdin when omitted)
    file: Option<PathBuf>,

    /// Evaluate an expression instead of reading a file
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Syntax-check only; report errors and exit
    #[arg(long)]
    check: bool,

    /// Print the compiled program rendered back to source
    #[arg(long)]
    render: bool,

    /// Dump the compiled program structure as JSON
    #[arg(long)]
    dump: bool,

    /// Tolerate unterminated strings (embedded-script salvage mode)
    #[arg(long)]
    silent: bool,

    /// Enable compiler/evaluator trace output
    #[arg(short, long)]
    verbose: bool,
}

/// Prints diagnostics to stderr as `line:start-end: key: message`.
struct StderrDiagnostics;

impl DiagnosticsSink for StderrDiagnostics {
    fn report(&mut self, d: &Diagnostic) {
        eprintln!(
            "{}:{}-{}: {}: {}",
            d.line, d.span.start, d.span.end, d.key, d.message
        );
    }
}

/// Prints walker output to stdout; domain commands as `> command args`.
#[derive(Default)]
struct StdoutSink;

impl CommandSink for StdoutSink {
    fn command(&mut self, name: &str, args: &[Var]) -> atomscript_core::error::EvalResult<()> {
        let rendered: Vec<String> = args.iter().map(std::string::ToString::to_string).collect();
        println!("> {name} {}", rendered.join(" "));
        Ok(())
    }

    fn echo(&mut self, text: &str) {
        println!("{text}");
    }
}

fn read_source(cli: &Cli) -> Result<String> {
    if let Some(expr) = &cli.eval {
        return Ok(format!("print {expr}"));
    }
    match &cli.file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("cannot read stdin")?;
            Ok(buf)
        }
    }
}

fn link_json(link: Link) -> serde_json::Value {
    serde_json::json!(format!("{link:?}"))
}

fn dump_json(program: &CompiledProgram) -> serde_json::Value {
    let statements: Vec<serde_json::Value> = program
        .statements
        .iter()
        .map(|s| {
            serde_json::json!({
                "line": s.line,
                "span": [s.span.start, s.span.end],
                "command": s.command_kind().map(|k| format!("{k:?}")),
                "tokens": s.tokens.iter().map(|t| format!("{:?}", t.kind)).collect::<Vec<_>>(),
                "link": s.link.map(link_json),
            })
        })
        .collect();
    let units: Vec<serde_json::Value> = program
        .units
        .iter()
        .map(|u| {
            serde_json::json!({
                "name": u.name,
                "params": u.params,
                "is_try": u.is_try,
                "is_parallel": u.is_parallel,
                "catch_index": u.catch_index,
                "statements": u.body.len(),
            })
        })
        .collect();
    serde_json::json!({
        "statements": statements,
        "units": units,
        "local_vars": program.local_vars,
    })
}

/// A small demo model so selections have something to select.
fn demo_model() -> TableModel {
    let mut m = TableModel::new();
    for (resno, resname, chain, atomname, occupancy) in [
        (1, "ALA", "A", "N", 1.0),
        (1, "ALA", "A", "CA", 1.0),
        (2, "GLY", "A", "CA", 0.5),
        (3, "HOH", "B", "O", 0.9),
    ] {
        m.add_entity(&[
            ("resno", Var::int(resno)),
            ("resname", Var::str(resname)),
            ("chain", Var::str(chain)),
            ("atomname", Var::str(atomname)),
            ("occupancy", Var::float(occupancy)),
        ]);
    }
    m.define_set("water", [3].into_iter().collect());
    m
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let source = read_source(&cli)?;
    let options = CompileOptions {
        silent: cli.silent,
        predefining: false,
        debug_trace: cli.verbose,
        check_only: cli.check,
    };

    let mut diagnostics = StderrDiagnostics;
    let program = match compile_with_sink(&source, &options, Some(&mut diagnostics)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("compile failed: {e}");
            process::exit(1);
        }
    };

    if cli.check {
        println!(
            "ok: {} statement(s), {} unit(s)",
            program.statements.len(),
            program.units.len()
        );
        return Ok(());
    }
    if cli.render {
        print!("{}", program.render());
        return Ok(());
    }
    if cli.dump {
        println!("{}", serde_json::to_string_pretty(&dump_json(&program))?);
        return Ok(());
    }

    // default (and --eval): execute against the demo model
    let mut store = MemoryStore::new();
    let mut model = demo_model();
    let mut sink = StdoutSink;
    if let Err(e) = Walker::new(&program, &mut store, &mut model, &mut sink).run() {
        eprintln!("runtime error: {e}");
        process::exit(2);
    }
    Ok(())
}
