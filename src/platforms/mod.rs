// src/platforms/mod.rs - Chat platform seam and the dry-run platform

use anyhow::Result;
use async_trait::async_trait;
use log::info;

/// Actions the message guard needs from the chat platform
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Get the platform identifier (e.g., "telegram", "dry-run")
    fn platform_name(&self) -> &str;

    /// Remove a message from a chat
    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<()>;

    /// Post a message, inside the given forum thread when there is one
    async fn send_message(&self, chat_id: &str, thread_id: Option<i64>, text: &str) -> Result<()>;
}

/// Dry-run platform that only logs what it would have done
#[derive(Debug, Default, Clone)]
pub struct LoggingPlatform;

impl LoggingPlatform {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChatPlatform for LoggingPlatform {
    fn platform_name(&self) -> &str {
        "dry-run"
    }

    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<()> {
        info!("[dry-run] would delete message {} in chat {}", message_id, chat_id);
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, thread_id: Option<i64>, text: &str) -> Result<()> {
        match thread_id {
            Some(thread) => info!("[dry-run] would send to {} (thread {}): {}", chat_id, thread, text),
            None => info!("[dry-run] would send to {}: {}", chat_id, text),
        }
        Ok(())
    }
}
