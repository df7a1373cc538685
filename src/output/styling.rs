//! Colours shared by job progress lines, the run summary and the banner.

use std::fmt::Display;

use console::{style, StyledObject};

use crate::monitor::BuildOutcome;

pub fn success(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn failure(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

/// Errors, interrupts and counts that need attention but are not a build result.
pub fn caution(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn job_name(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn link(url: &str) -> StyledObject<String> {
    style(url.to_string()).cyan().underlined()
}

pub fn muted(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn heading(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn banner(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Final word on a job's progress line.
pub fn verdict(outcome: &BuildOutcome) -> String {
    match outcome {
        BuildOutcome::Success => success("SUCCESS ✓").to_string(),
        BuildOutcome::Failed { result, .. } => failure(format!("{result} ✗")).to_string(),
        BuildOutcome::Error(cause) => caution(format!("ERROR: {cause}")).to_string(),
    }
}
