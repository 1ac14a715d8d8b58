// src/bot/mod.rs - Moderation pipeline modules

pub mod censorship;
pub mod classifier;
pub mod decision_cache;
pub mod keyword_matching;
pub mod keywords;
pub mod moderation;
pub mod pattern_matching;
pub mod sequence_tracker;

pub use censorship::{CensorshipStatus, CensorshipSwitch, MessageGuard};
pub use moderation::ElectionModerator;
