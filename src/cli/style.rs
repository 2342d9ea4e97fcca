//! Terminal styling helpers for the status command

use owo_colors::OwoColorize;

/// Extension trait for consistent styling of human-facing output
pub trait Stylize: std::fmt::Display + Sized {
    /// De-emphasized text
    fn muted(&self) -> String {
        format!("{}", self.dimmed())
    }

    /// Emphasized text
    fn emphasis(&self) -> String {
        format!("{}", self.bold())
    }

    /// Highlighted value
    fn accent(&self) -> String {
        format!("{}", self.cyan())
    }

    /// Warning text
    fn warn(&self) -> String {
        format!("{}", self.yellow())
    }

    /// Success text
    fn success(&self) -> String {
        format!("{}", self.green())
    }
}

impl<T: std::fmt::Display> Stylize for T {}
