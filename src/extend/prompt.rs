//! Human input.
//!
//! The orchestrator asks for everything through [`Prompter`] and maps the
//! answers back onto typed choices itself.

use anyhow::{Context, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};

pub trait Prompter {
    /// Pick one of `items`, returning its index.
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize>;

    /// Free-form text. May be empty.
    fn input(&mut self, prompt: &str) -> Result<String>;

    /// Yes/no gate. Implementations re-ask until they get a valid answer.
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Terminal prompts. Every answer is mirrored into the run log.
#[derive(Default)]
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prompter for TerminalPrompter {
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize> {
        let index = Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
            .context("reading menu selection")?;
        tracing::info!("{prompt}: {}", items[index]);
        Ok(index)
    }

    fn input(&mut self, prompt: &str) -> Result<String> {
        let answer: String = Input::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .context("reading input")?;
        tracing::info!("{prompt}: {answer}");
        Ok(answer)
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("reading confirmation")?;
        tracing::info!("{prompt}: {}", if answer { "yes" } else { "no" });
        Ok(answer)
    }
}
