//! Writes the push-api OpenAPI document.
//!
//! Usage: `generate-openapi [OUT]`. Defaults to `specs/push-api.json` at the
//! workspace root.

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let out = std::env::args_os().nth(1).map(PathBuf::from).unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../specs/push-api.json")
    });

    match push_api::routes::write_openapi(&out) {
        Ok(()) => {
            println!("Wrote {}", out.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("cannot write {}: {e}", out.display());
            ExitCode::FAILURE
        }
    }
}
