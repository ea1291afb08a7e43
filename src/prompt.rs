//! Operator confirmation

use crate::error::Result;
use std::io::{BufRead, Write};

/// Asks the operator before expensive or destructive actions.
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Answers every question the same way.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        tracing::debug!("Auto-answering {:?} with {}", question, self.0);
        Ok(self.0)
    }
}

/// Prompts on the terminal and reads a yes/no answer from stdin.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{} (y/n) ", question)?;
        stderr.flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(is_yes(&input))
    }
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes("YES"));
        assert!(is_yes(" Yes "));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
    }

    #[test]
    fn test_auto_confirm() {
        assert!(AutoConfirm(true).confirm("pull?").unwrap());
        assert!(!AutoConfirm(false).confirm("pull?").unwrap());
    }
}
