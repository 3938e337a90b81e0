use clap::{Parser, Subcommand};

mod abi;
mod eval;
mod query;
mod utils;

#[cfg(test)]
mod tests;

use abi::handle_abi;
use eval::handle_eval;
use query::{handle_alignof, handle_offsetof, handle_sizeof, handle_typeof};
use utils::{init_logging, make_runtime};

/// Get the version string including git revision
fn version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), " (git:", env!("GIT_HASH"), ")")
}

#[derive(Parser)]
#[command(
    author,
    version = version(),
    about = "Inspect C types and the target ABI",
    long_about = None,
    disable_help_subcommand = true
)]
struct Cli {
    /// Declaration files to load before running the command ("-" for stdin)
    #[arg(long = "cdef", global = true, value_name = "FILE")]
    cdef: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe the target: OS, architecture, ABI flags and type sizes
    Abi {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the size of a C type in bytes
    Sizeof {
        /// The type, e.g. "struct point" or "int[?]"
        ty: String,
        /// Element count for variable-length arrays
        #[arg(short = 'n', long)]
        count: Option<i64>,
    },
    /// Print the alignment of a C type
    Alignof {
        /// The type
        ty: String,
    },
    /// Print the offset of a record member
    Offsetof {
        /// The record type
        ty: String,
        /// The member name
        field: String,
    },
    /// Print the canonical spelling of a C type
    Typeof {
        /// The type
        ty: String,
    },
    /// Evaluate a numeric literal with C typing rules
    Eval {
        /// The literal, e.g. "0x10ULL" or "1.5f"
        literal: String,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Abi { json } => handle_abi(json),
        Commands::Sizeof { ty, count } => {
            make_runtime(&cli.cdef).and_then(|ffi| handle_sizeof(&ffi, &ty, count))
        }
        Commands::Alignof { ty } => make_runtime(&cli.cdef).and_then(|ffi| handle_alignof(&ffi, &ty)),
        Commands::Offsetof { ty, field } => {
            make_runtime(&cli.cdef).and_then(|ffi| handle_offsetof(&ffi, &ty, &field))
        }
        Commands::Typeof { ty } => make_runtime(&cli.cdef).and_then(|ffi| handle_typeof(&ffi, &ty)),
        Commands::Eval { literal } => {
            make_runtime(&cli.cdef).and_then(|ffi| handle_eval(&ffi, &literal))
        }
    };

    match result {
        Ok(output) => println!("{output}"),
        Err(message) => {
            eprintln!("Error: {message}");
            std::process::exit(1);
        }
    }
}
