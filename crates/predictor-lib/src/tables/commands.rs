//! The command queue table
//!
//! Each inserted string is parsed once into a [`Command`] and executed
//! before the insert is acknowledged.

use super::predictors::PredictorsTable;
use crate::error::{PredictorError, Result};
use crate::observability::EventLogger;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    DeletePredictor(String),
    RetrainPredictor(String),
}

impl FromStr for Command {
    type Err = PredictorError;

    fn from_str(raw: &str) -> Result<Self> {
        let unknown = || PredictorError::UnknownCommand(raw.to_string());
        let text = raw.trim().trim_end_matches(';').trim();

        let (verb, rest) = split_word(text).ok_or_else(unknown)?;
        let (noun, target) = split_word(rest).ok_or_else(unknown)?;
        if !noun.eq_ignore_ascii_case("predictor") {
            return Err(unknown());
        }
        let name = parse_name(target).ok_or_else(unknown)?;

        match verb.to_ascii_lowercase().as_str() {
            "delete" | "drop" => Ok(Command::DeletePredictor(name)),
            "retrain" => Ok(Command::RetrainPredictor(name)),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::DeletePredictor(name) => write!(f, "delete predictor {}", name),
            Command::RetrainPredictor(name) => write!(f, "retrain predictor {}", name),
        }
    }
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.find(char::is_whitespace) {
        Some(idx) => Some((&text[..idx], text[idx..].trim_start())),
        None => Some((text, "")),
    }
}

/// A bare word, or anything wrapped in back-quotes or single quotes
fn parse_name(text: &str) -> Option<String> {
    let text = text.trim();
    for quote in ['`', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return (!inner.is_empty()).then(|| inner.to_string());
        }
    }
    if text.is_empty() || text.contains(char::is_whitespace) {
        return None;
    }
    Some(text.to_string())
}

pub struct CommandsTable {
    predictors: Arc<PredictorsTable>,
    events: EventLogger,
}

impl CommandsTable {
    pub fn new(predictors: Arc<PredictorsTable>, events: EventLogger) -> Self {
        Self { predictors, events }
    }

    /// Parse and run one command; its failure is the insert's failure
    pub async fn execute(&self, raw: &str) -> Result<()> {
        let command: Command = raw.parse()?;
        let result = match &command {
            Command::DeletePredictor(name) => self.predictors.delete(name).await,
            Command::RetrainPredictor(name) => {
                let handle = self.predictors.orchestrator().retrain(name).await?;
                handle.join().await
            }
        };
        self.events
            .log_command_executed(&command.to_string(), result.is_ok());
        result
    }
}
