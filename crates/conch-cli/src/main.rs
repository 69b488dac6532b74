use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use conch_bytecode::Unit;
use conch_vm::{Vm, VmConfig, VmError, PANIC_EXIT_CODE};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "conch", version, about = "Bytecode interpreter for the conch shell language")]
struct Cli {
    /// Compiled bytecode unit to execute
    unit: PathBuf,

    /// Call-stack capacity in bytes
    #[arg(long, default_value_t = conch_vm::config::DEFAULT_CALL_STACK_CAPACITY)]
    stack_size: usize,

    /// Arguments exposed to the program via std::memory::program_arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let bytes = fs::read(&cli.unit)
        .with_context(|| format!("could not read {}", cli.unit.display()))?;
    let unit = match Unit::from_bytes(&bytes) {
        Ok(unit) => unit,
        Err(err) => {
            let err = VmError::from(err);
            eprintln!("{}: {err}", err.kind());
            process::exit(1);
        }
    };

    let config = VmConfig {
        call_stack_capacity: cli.stack_size,
        program_args: cli.args,
    };
    let mut vm = Vm::new(&unit, config);
    if let Err(err) = vm.run() {
        eprintln!("{}: {err}", err.kind());
        let code = match err {
            VmError::Panic(_) => PANIC_EXIT_CODE,
            _ => 1,
        };
        process::exit(code);
    }

    Ok(())
}
