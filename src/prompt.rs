use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::error::ProvisionResult;

/// Normalizes a raw answer or rejects it with a `Validation` error.
pub type Validator<'a> = &'a dyn Fn(&str) -> ProvisionResult<String>;

/// Source of operator answers.
pub trait Prompt {
    /// Ask for a value, offering `default`. The returned value has
    /// passed `validate` and is in its normalized form.
    fn input(&self, label: &str, default: &str, validate: Validator<'_>) -> ProvisionResult<String>;

    /// Ask a yes/no question.
    fn confirm(&self, question: &str, default: bool) -> ProvisionResult<bool>;
}

/// Terminal prompts. Invalid answers are reported and asked again.
#[derive(Default)]
pub struct Interactive {
    theme: ColorfulTheme,
}

impl Interactive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prompt for Interactive {
    fn input(&self, label: &str, default: &str, validate: Validator<'_>) -> ProvisionResult<String> {
        let raw: String = Input::with_theme(&self.theme)
            .with_prompt(label)
            .default(default.to_string())
            .validate_with(|value: &String| validate(value).map(|_| ()).map_err(|e| e.to_string()))
            .interact_text()?;
        validate(&raw)
    }

    fn confirm(&self, question: &str, default: bool) -> ProvisionResult<bool> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(question)
            .default(default)
            .interact()?)
    }
}

/// Answers without a terminal: defaults are taken as given and an
/// invalid default is fatal. Confirmations resolve to `assume_yes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended {
    assume_yes: bool,
}

impl Unattended {
    #[must_use]
    pub const fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Prompt for Unattended {
    fn input(&self, _label: &str, default: &str, validate: Validator<'_>) -> ProvisionResult<String> {
        validate(default)
    }

    fn confirm(&self, _question: &str, _default: bool) -> ProvisionResult<bool> {
        Ok(self.assume_yes)
    }
}
