//! Entry point for the `pulsed` daemon.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match pulsed::run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr(), "pulsed: {error}"));
            ExitCode::FAILURE
        }
    }
}
