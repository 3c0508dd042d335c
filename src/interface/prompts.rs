use dialoguer::{Confirm, Input};
use strsim::jaro_winkler;
use tracing::debug;

use crate::error::Result;

/// Minimum similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.7;

/// Operator acknowledgements requested during a run.
pub trait OperatorPrompt {
    /// Block until the operator acknowledges `message`.
    fn pause(&mut self, message: &str) -> Result<()>;
}

/// Interactive terminal prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl OperatorPrompt for ConsolePrompt {
    fn pause(&mut self, message: &str) -> Result<()> {
        let _: String = Input::new()
            .with_prompt(message)
            .allow_empty(true)
            .interact_text()?;
        Ok(())
    }
}

/// Never blocks; used for unattended runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl OperatorPrompt for NoPrompt {
    fn pause(&mut self, message: &str) -> Result<()> {
        debug!("skipping pause: {}", message);
        Ok(())
    }
}

/// Closest candidate to `input` by Jaro-Winkler similarity, if any is close enough.
pub fn closest_match<'a, I>(input: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let input = input.to_lowercase();
    candidates
        .into_iter()
        .map(|c| (c, jaro_winkler(&c.to_lowercase(), &input)))
        .filter(|(_, score)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

/// Prompt for yes/no confirmation.
pub fn prompt_yes_no(prompt: &str, default: bool) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?)
}
