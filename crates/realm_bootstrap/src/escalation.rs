//! Fatal error escalation.
//!
//! A fatal startup error is reported, the operator is asked to acknowledge it
//! with a keystroke when a terminal is attached, and the process exits with a
//! failure status. Nothing is shut down in between.

use crate::error::BootstrapError;
use std::error::Error;
use std::io::{self, BufRead};
use tracing::error;

#[derive(Debug, Clone, Copy)]
pub struct ErrorEscalation {
    interactive: bool,
}

impl ErrorEscalation {
    /// `interactive` controls whether the operator is asked to press enter
    /// before the process exits.
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Logs `failure` with its causes and waits for one line on `input` when
    /// interactive.
    pub fn report<R: BufRead>(&self, failure: &BootstrapError, input: &mut R) {
        error!("{}", failure);
        let mut cause = failure.source();
        while let Some(inner) = cause {
            error!("  caused by: {}", inner);
            cause = inner.source();
        }

        if self.interactive {
            error!("The program will close after pressing the enter key...");
            let mut line = String::new();
            // EOF or a read error count as acknowledgement
            let _ = input.read_line(&mut line);
        }
    }

    /// Reports `failure` and terminates the process.
    pub fn escalate(&self, failure: &BootstrapError) -> ! {
        self.report(failure, &mut io::stdin().lock());
        std::process::exit(failure.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FatalError, StageError};
    use std::io::Cursor;

    fn fatal() -> BootstrapError {
        BootstrapError::Fatal(FatalError {
            stage: "world type".to_string(),
            source: StageError::Configuration("Unknown world type: invalid-mode".to_string()),
        })
    }

    #[test]
    fn test_interactive_waits_for_one_line() {
        let mut input = Cursor::new(b"\nsecond line\n".to_vec());
        ErrorEscalation::new(true).report(&fatal(), &mut input);
        assert_eq!(input.position(), 1);
    }

    #[test]
    fn test_non_interactive_does_not_read() {
        let mut input = Cursor::new(b"\n".to_vec());
        ErrorEscalation::new(false).report(&fatal(), &mut input);
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn test_closed_input_still_returns() {
        let mut input = Cursor::new(Vec::new());
        ErrorEscalation::new(true).report(&fatal(), &mut input);
    }
}
