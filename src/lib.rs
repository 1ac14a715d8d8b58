//! # ballotguard
//!
//! Election-content moderation for group chats during a cooling-off period.
//!
//! Every new or edited message runs through a staged pipeline that stops at
//! the first positive, cheapest stage first:
//!
//! - **Decision cache**: SHA-256 digest of the exact text, persisted in SQLite
//! - **Structural detection**: acrostics and ASCII art
//! - **Split-message tracking**: short messages joined per sender
//! - **Keywords**: parties, electoral terms, figures, symbols, emoji, CJK terms
//!   and campaign rhetoric, all loaded from a hot-reloadable YAML file
//! - **Remote classifier**: an OpenAI-compatible chat model answering YES/NO
//!
//! Any failure allows the message; local positives are trusted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ballotguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let moderator = ElectionModerator::new(
//!         DecisionCache::in_memory(),
//!         &KeywordSet::default(),
//!         RuleToggles::default(),
//!         &SenderWindowConfig::default(),
//!     )?;
//!
//!     assert!(moderator.decide("vote PAP", None).await);
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::censorship::{CensorshipStatus, CensorshipSwitch, MessageGuard};
    pub use crate::bot::classifier::{ClassifierBudget, ClassifierError, ContentClassifier, LlmClassifier};
    pub use crate::bot::decision_cache::{
        content_digest, DecisionCache, MemoryVerdictStore, SqliteVerdictStore, VerdictStore,
    };
    pub use crate::bot::keywords::KeywordSet;
    pub use crate::bot::moderation::ElectionModerator;
    pub use crate::config::{
        ConfigChangeEvent, ConfigurationManager, ModerationConfig, RuleToggles, SenderWindowConfig,
    };
    pub use crate::platforms::{ChatPlatform, LoggingPlatform};
    pub use crate::types::{ChatMessage, Decision, DecisionSource, GuardOutcome, SkipReason};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
