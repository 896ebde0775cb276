//! # mancer CLI entry point
//!
//! Parses arguments, dispatches to the `Cli` facade in `mancer::cli`, and
//! maps the result onto a process exit code.
//!
//! # Exit Codes
//!
//! - 0: the requested command ran and succeeded
//! - 1: the command ran but failed, or the CLI itself hit an error (bad
//!   config, unreachable remote host, ...)
//! - 2 and above: the executed command's own non-zero exit code, preserved
//!   verbatim (spec §6)

use clap::Parser;
use mancer::cli::Cli;
use std::process;

fn main() {
    let args = Cli::parse();

    match args.run() {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
