//! JSON output for CLI commands
//!
//! Every command prints one JSON object per line on stdout:
//! `{"status": "ok", "data": ...}`.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });

    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}
