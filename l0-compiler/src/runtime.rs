//! The trusted runtime contract shipped with the compiler.
//!
//! Generated translation units `#include "l0_runtime.h"`; the driver
//! materializes these headers next to the emitted C.

use std::fs;
use std::io;
use std::path::Path;

pub const RUNTIME_HEADER_NAME: &str = "l0_runtime.h";
pub const SIPHASH_HEADER_NAME: &str = "l0_siphash.h";

pub const RUNTIME_HEADER: &str = include_str!("../runtime/l0_runtime.h");
pub const SIPHASH_HEADER: &str = include_str!("../runtime/l0_siphash.h");

/// Write both runtime headers into `dir`.
pub fn write_runtime_headers(dir: &Path) -> io::Result<()> {
    fs::write(dir.join(RUNTIME_HEADER_NAME), RUNTIME_HEADER)?;
    fs::write(dir.join(SIPHASH_HEADER_NAME), SIPHASH_HEADER)?;
    Ok(())
}
