use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use forthright::{Machine, MachineConfig, CELL};

fn parse_memsize(val: &str) -> clap::error::Result<usize> {
    let last_char = val.chars().last().ok_or_else(|| {
        clap::error::Error::raw(clap::error::ErrorKind::ValueValidation, "empty value")
    })?;
    let (unit, val) = match last_char {
        'b' => (1, &val[..val.len() - 1]),
        'k' => (1024, &val[..val.len() - 1]),
        'M' => (1024 * 1024, &val[..val.len() - 1]),
        'G' => (1024 * 1024 * 1024, &val[..val.len() - 1]),
        // Default is 'k'
        _ => (1024, val),
    };
    let num: usize = val
        .parse()
        .map_err(|e| clap::error::Error::raw(clap::error::ErrorKind::ValueValidation, e))?;
    Ok(num * unit)
}

#[derive(Parser)]
#[command(name = "forthright")]
/// Indirect-threaded Forth interpreter
///
/// To pass a forth source code file, invoke with
///
///     $ cat FORTH_FILE | forthright
///
/// If you want to continue running the interpreter, use
///
///     $ cat FORTH_FILE - | forthright
struct CliArgs {
    /// Initial size of user memory, backing the dictionary and all data
    /// allocations. User memory grows on demand; this only sets the start.
    ///
    /// You may suffix the number with one of 'b', 'k', 'M' & 'G' to specify
    /// the size unit. Omitting the suffix defaults to 'k', i.e. kilobytes.
    #[arg(long, default_value = "32k", value_parser = parse_memsize)]
    user_memory: usize,
    /// Maximum number of cells on the data stack.
    #[arg(long, default_value_t = 256)]
    data_stack_size: usize,
    /// Maximum number of cells on the return stack.
    #[arg(long, default_value_t = 256)]
    return_stack_size: usize,
    /// Maximum number of cells on the control-flow stack.
    #[arg(long, default_value_t = 256)]
    control_stack_size: usize,
    /// How many cells user memory grows by at a time (the UINCR variable).
    #[arg(long, default_value_t = 1024)]
    growth_increment: usize,
    /// Free-cell threshold under which user memory grows (the UTHRES
    /// variable).
    #[arg(long, default_value_t = 1024)]
    growth_threshold: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli_args = CliArgs::parse();
    let config = MachineConfig {
        data_space_cells: cli_args.user_memory / CELL,
        data_stack_cells: cli_args.data_stack_size,
        return_stack_cells: cli_args.return_stack_size,
        control_stack_cells: cli_args.control_stack_size,
        growth_increment_cells: cli_args.growth_increment,
        growth_threshold_cells: cli_args.growth_threshold,
    };
    let stdin = io::stdin();
    let mut machine = Machine::new(config, Box::new(stdin.lock()), Box::new(io::stdout()));
    let status = machine.run();
    ExitCode::from(status.clamp(0, 255) as u8)
}
