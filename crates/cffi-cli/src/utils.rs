//! Shared CLI utilities: input, logging and runtime setup

use cffi_core::Ffi;
use std::fs;
use std::io::{self, Read};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Read source from a file or stdin.
/// If `file` is "-", reads from stdin. Otherwise reads from the specified file.
pub fn read_source(file: &str) -> io::Result<String> {
    if file == "-" {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source)?;
        Ok(source)
    } else {
        fs::read_to_string(file)
    }
}

/// Log to stderr, filtered by `CFFI_LOG` (default: warnings only)
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("CFFI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// A runtime with every declaration file in `cdefs` loaded, in order
pub fn make_runtime(cdefs: &[String]) -> Result<Ffi, String> {
    let ffi = Ffi::new();
    for file in cdefs {
        let source =
            read_source(file).map_err(|err| format!("Error reading file '{file}': {err}"))?;
        ffi.cdef(&source).map_err(|err| format!("{file}: {err}"))?;
        debug!(file = %file, "loaded declarations");
    }
    Ok(ffi)
}
