//! Review of a staged script before it runs.
//!
//! The user sees the exact file that will be executed and confirms it.
//! Empty input accepts, so a single Enter runs the script.

use anyhow::Result;
use std::io::{BufRead, Write};
use tracing::info;

const RULE_WIDTH: usize = 50;

/// The user's answer to the execution prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Execute,
    Decline,
}

impl Confirmation {
    /// Empty, `y` and `yes` (any case) accept; anything else declines.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => Self::Execute,
            _ => Self::Decline,
        }
    }
}

/// Shows proposed scripts and asks whether to run them.
#[derive(Debug, Default)]
pub struct ScriptReview;

impl ScriptReview {
    pub fn new() -> Self {
        Self
    }

    // =========================================================================
    // Core methods with I/O injection (testable)
    // =========================================================================

    /// Writes the script between a "Proposed Script" header and a closing rule.
    pub fn display_script_with_io<W: Write>(&self, contents: &str, output: &mut W) -> Result<()> {
        writeln!(output, "\n{} Proposed Script {}", "-".repeat(16), "-".repeat(17))?;
        write!(output, "{}", contents)?;
        if !contents.ends_with('\n') {
            writeln!(output)?;
        }
        writeln!(output, "{}", "-".repeat(RULE_WIDTH))?;
        Ok(())
    }

    /// Asks `Execute this script? (Y/n): ` and reads one answer.
    ///
    /// End of input counts as a decline.
    ///
    /// # Errors
    ///
    /// Returns an error if I/O operations fail.
    pub fn confirm_with_io<R: BufRead, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<Confirmation> {
        write!(output, "Execute this script? (Y/n): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            info!("Input closed at confirmation prompt, declining");
            return Ok(Confirmation::Decline);
        }

        let confirmation = Confirmation::from_answer(&line);
        info!("User answered {:?} to script confirmation", confirmation);
        Ok(confirmation)
    }

    pub fn show_declined_with_io<W: Write>(&self, output: &mut W) -> Result<()> {
        writeln!(output, "Script not executed.")?;
        Ok(())
    }
}
