//! Terminal confirmation prompts
//!
//! Prompts are answered while the store holds its write lock for the token,
//! so other writers of the same data directory wait until the operator
//! responds.

use std::io::{self, BufRead, Write};

use tokenguard_core::{Confirm, ConfirmRequest};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

/// Asks the operator on stdin/stdout, defaulting to "no"
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        let answer = blocking(|| {
            let stdin = io::stdin();
            let stdout = io::stdout();
            ask(request, &mut stdin.lock(), &mut stdout.lock())
        });

        match answer {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Could not read confirmation: {}", e);
                false
            }
        }
    }
}

/// Run a blocking read, handing this worker's other tasks to the rest of a
/// multi-threaded runtime first
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Print the request and read a y/N answer
pub fn ask(request: &ConfirmRequest, input: &mut dyn BufRead, output: &mut dyn Write) -> io::Result<bool> {
    if let Some(warning) = request.warning() {
        writeln!(output, "{}", warning)?;
    }
    write!(output, "{} [y/N] ", request.question())?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    answer == "y" || answer == "yes"
}
