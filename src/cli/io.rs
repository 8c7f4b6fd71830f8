//! JSON output for CLI commands: one JSON value per stdout line

use std::io::{self, Write};

use serde::Serialize;

use super::errors::CliResult;

/// Write `value` to stdout as a single JSON line
pub fn write_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_json_to(&mut out, value)?;
    out.flush()?;
    Ok(())
}

pub(super) fn write_json_to<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
