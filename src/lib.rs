use clap::Parser;
use std::{io, path::PathBuf, process::ExitCode};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod error;
pub mod gc;
pub mod memory;
pub mod metrics;
pub mod program;
pub mod utils;
pub mod value;
#[macro_use]
pub mod vm;

use config::VmConfig;
use error::VmError;
use program::BytecodeProgram;
use value::Value;
use vm::VirtualMachine;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A stack-based bytecode interpreter with a mark-sweep garbage collector"
)]
pub struct Args {
    #[arg(value_name = "PROGRAM")]
    pub program: PathBuf,
    /// Function to run; defaults to the program's entry function
    #[arg(short, long, value_name = "NAME")]
    pub entry: Option<String>,
    /// Argument for the entry function (int, float, bool, 'c' or null); repeatable
    #[arg(short = 'a', long = "arg", value_name = "VALUE")]
    pub args: Vec<String>,
    #[arg(long, value_name = "BYTES")]
    pub heap_size: Option<usize>,
    /// Collect before every allocation
    #[arg(long)]
    pub gc_stress: bool,
    /// Print runtime metrics as JSON to stderr after the run
    #[arg(long)]
    pub metrics: bool,
    /// Print the program's functions instead of running it
    #[arg(long)]
    pub disassemble: bool,
}

/// Parses a command-line literal into a primitive value.
pub fn parse_value(text: &str) -> Option<Value> {
    let text = text.trim();
    match text {
        "null" => return Some(Value::Null),
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    if let Ok(d) = text.parse::<f64>() {
        return Some(Value::Double(d));
    }
    let mut chars = text.strip_prefix('\'')?.strip_suffix('\'')?.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(Value::Char(c)),
        _ => None,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run_cli() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let program = match BytecodeProgram::load_json(&args.program) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}: {}", args.program.display(), VmError::from(e));
            return ExitCode::FAILURE;
        }
    };

    if args.disassemble {
        for function in &program.functions {
            println!("{}", function);
        }
        return ExitCode::SUCCESS;
    }

    let entry = match args.entry.clone().or_else(|| program.entry_function().map(|f| f.name.clone())) {
        Some(name) => name,
        None => {
            eprintln!("error: program has no entry function {}", program.entry_function_id);
            return ExitCode::FAILURE;
        }
    };

    let mut values = Vec::with_capacity(args.args.len());
    for raw in &args.args {
        match parse_value(raw) {
            Some(v) => values.push(v),
            None => {
                eprintln!("error: cannot parse argument {:?}", raw);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut config = VmConfig::from_env();
    if let Some(bytes) = args.heap_size {
        config.heap_capacity = bytes;
    }
    config.gc_stress |= args.gc_stress;

    let mut vm = VirtualMachine::with_config(program, config);
    let result = vm.run_with_args(&entry, &values);

    if args.metrics {
        match serde_json::to_string_pretty(vm.metrics()) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => eprintln!("error: cannot serialize metrics: {}", e),
        }
    }

    match result {
        Ok(value) => {
            match vm.read_string(value) {
                Some(text) => println!("{}", text),
                None => println!("{}", value),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            match vm.last_fault() {
                Some(location) => eprintln!("error: {} at {}", e, location),
                None => eprintln!("error: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}
