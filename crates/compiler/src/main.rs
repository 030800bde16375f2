//! Purple Compiler CLI
//!
//! Command-line interface for compiling Purple programs to LLVM IR and,
//! via clang, to native executables.

use clap::{Parser as ClapParser, ValueEnum};
use std::path::PathBuf;
use std::process;

use tracing::level_filters::LevelFilter;

/// Level of log statements to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    #[value(name = "NONE")]
    None,
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::OFF,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

#[derive(ClapParser)]
#[command(name = "purplec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "The standard compiler for the Purple programming language", long_about = None)]
struct Cli {
    /// Input source file
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,

    /// Path to the generated assembly file
    #[arg(short, long, default_value = "a.s")]
    output: PathBuf,

    /// Level of log statements to print
    #[arg(short = 'l', long = "logging", value_enum, ignore_case = true)]
    logging: Option<LogLevel>,

    /// Equivalent to --logging=NONE
    #[arg(short, long)]
    quiet: bool,

    /// Equivalent to --logging=DEBUG
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LogLevel::None
    } else if cli.verbose {
        LogLevel::Debug
    } else {
        cli.logging.unwrap_or(LogLevel::Info)
    };
    tracing_subscriber::fmt()
        .with_max_level(level.filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = purplec::CompilerConfig::default();
    if let Err(error) = purplec::compile_file(&cli.program, &cli.output, &config) {
        eprintln!("{}", error);
        process::exit(error.return_code());
    }
}
