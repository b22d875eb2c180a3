//! Murmur chat server binary.

use std::process::ExitCode;

fn main() -> ExitCode {
    murmur_chat::start_server::run()
}
