// src/types/mod.rs - Message and verdict types shared across the moderation pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bot::keyword_matching::KeywordRule;

/// A new or edited group chat message as delivered by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: String,
    pub message_id: i64,
    /// Forum topic the message was posted in, if any
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Caption of a photo, video or document
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    /// Non-empty text if present, otherwise a non-empty caption
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|text| !text.is_empty())
            .or_else(|| self.caption.as_deref().filter(|caption| !caption.is_empty()))
    }

    /// Name used when addressing the sender in a notice
    pub fn display_name(&self) -> &str {
        if self.sender_name.trim().is_empty() {
            "User"
        } else {
            &self.sender_name
        }
    }
}

/// Stage of the pipeline that settled a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    EmptyInput,
    Cache,
    Acrostic,
    AsciiArt,
    SplitSequence,
    Keyword(KeywordRule),
    Classifier,
    /// Transport, timeout or malformed answer; the message is allowed
    ClassifierFailed,
    /// No classifier configured; the message is allowed
    ClassifierDisabled,
    BudgetExhausted,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionSource::EmptyInput => write!(f, "empty input"),
            DecisionSource::Cache => write!(f, "cache"),
            DecisionSource::Acrostic => write!(f, "acrostic"),
            DecisionSource::AsciiArt => write!(f, "ascii art"),
            DecisionSource::SplitSequence => write!(f, "split sequence"),
            DecisionSource::Keyword(rule) => write!(f, "keyword ({:?})", rule),
            DecisionSource::Classifier => write!(f, "classifier"),
            DecisionSource::ClassifierFailed => write!(f, "classifier failed"),
            DecisionSource::ClassifierDisabled => write!(f, "classifier disabled"),
            DecisionSource::BudgetExhausted => write!(f, "classifier budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub flagged: bool,
    pub source: DecisionSource,
}

impl Decision {
    pub fn flagged(source: DecisionSource) -> Self {
        Self {
            flagged: true,
            source,
        }
    }

    pub fn allowed(source: DecisionSource) -> Self {
        Self {
            flagged: false,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoContent,
    CensorshipOff,
}

/// Chat commands that toggle censorship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CensorshipCommand {
    Start,
    Stop,
    Check,
}

impl CensorshipCommand {
    /// Recognise `/startCensorship`, `/stopCensorship` and `/checkCensorship`,
    /// in any case and with an optional `@botname` suffix
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        let command = first.strip_prefix('/')?;
        let command = command.split('@').next().unwrap_or(command);

        match command.to_lowercase().as_str() {
            "startcensorship" => Some(Self::Start),
            "stopcensorship" => Some(Self::Stop),
            "checkcensorship" => Some(Self::Check),
            _ => None,
        }
    }
}

/// What the message guard did with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// A censorship command; `accepted` is false when the sender isn't an admin
    Command {
        command: CensorshipCommand,
        accepted: bool,
    },
    Skipped(SkipReason),
    Allowed,
    Removed { notified: bool },
    DeleteFailed,
}
