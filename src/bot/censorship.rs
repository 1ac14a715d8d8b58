// src/bot/censorship.rs - Per-chat censorship switch and the message guard

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::moderation::ElectionModerator;
use crate::platforms::ChatPlatform;
use crate::types::{CensorshipCommand, ChatMessage, GuardOutcome, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CensorshipStatus {
    Active,
    Inactive,
    NotSet,
}

/// Which chats have election censorship switched on
pub struct CensorshipSwitch {
    chats: RwLock<HashMap<String, bool>>,
    default_active: bool,
}

impl CensorshipSwitch {
    pub fn new(default_active: bool) -> Self {
        Self {
            chats: RwLock::new(HashMap::new()),
            default_active,
        }
    }

    pub async fn activate(&self, chat_id: &str) {
        self.chats.write().await.insert(chat_id.to_string(), true);
        info!("Censorship activated for chat {}", chat_id);
    }

    pub async fn deactivate(&self, chat_id: &str) {
        self.chats.write().await.insert(chat_id.to_string(), false);
        info!("Censorship deactivated for chat {}", chat_id);
    }

    pub async fn status(&self, chat_id: &str) -> CensorshipStatus {
        match self.chats.read().await.get(chat_id) {
            Some(true) => CensorshipStatus::Active,
            Some(false) => CensorshipStatus::Inactive,
            None => CensorshipStatus::NotSet,
        }
    }

    /// Explicit per-chat state wins over the default
    pub async fn is_enforced(&self, chat_id: &str) -> bool {
        match self.status(chat_id).await {
            CensorshipStatus::Active => true,
            CensorshipStatus::Inactive => false,
            CensorshipStatus::NotSet => self.default_active,
        }
    }

    pub fn default_active(&self) -> bool {
        self.default_active
    }
}

/// Runs incoming and edited messages through the moderator and removes flagged ones
pub struct MessageGuard {
    moderator: Arc<ElectionModerator>,
    switch: Arc<CensorshipSwitch>,
    admins: Vec<String>,
}

impl MessageGuard {
    pub fn new(moderator: Arc<ElectionModerator>, switch: Arc<CensorshipSwitch>) -> Self {
        Self {
            moderator,
            switch,
            admins: Vec::new(),
        }
    }

    /// Restrict censorship commands to these sender ids
    pub fn with_admins(mut self, admins: Vec<String>) -> Self {
        self.admins = admins;
        self
    }

    pub fn switch(&self) -> &Arc<CensorshipSwitch> {
        &self.switch
    }

    pub fn moderator(&self) -> &Arc<ElectionModerator> {
        &self.moderator
    }

    pub async fn handle(&self, message: &ChatMessage, platform: &dyn ChatPlatform) -> GuardOutcome {
        let Some(content) = message.content() else {
            return GuardOutcome::Skipped(SkipReason::NoContent);
        };

        if !message.edited {
            if let Some(command) = CensorshipCommand::parse(content) {
                return self.handle_command(command, message, platform).await;
            }
        }

        if !self.switch.is_enforced(&message.chat_id).await {
            debug!("Censorship off for chat {}, skipping", message.chat_id);
            return GuardOutcome::Skipped(SkipReason::CensorshipOff);
        }

        let decision = self
            .moderator
            .evaluate(Some(&message.chat_id), content, message.sender_id.as_deref())
            .await;

        if !decision.flagged {
            return GuardOutcome::Allowed;
        }

        if let Err(e) = platform
            .delete_message(&message.chat_id, message.message_id)
            .await
        {
            error!(
                "Failed to delete message {} in chat {} on {}: {:#}",
                message.message_id,
                message.chat_id,
                platform.platform_name(),
                e
            );
            return GuardOutcome::DeleteFailed;
        }

        info!(
            "Deleted {}message {} in chat {} ({})",
            if message.edited { "edited " } else { "" },
            message.message_id,
            message.chat_id,
            decision.source
        );

        let notice = removal_notice(message);
        let notified = match platform
            .send_message(&message.chat_id, message.thread_id, &notice)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to notify chat {} about removal: {:#}", message.chat_id, e);
                false
            }
        };

        GuardOutcome::Removed { notified }
    }
}

impl MessageGuard {
    fn is_admin(&self, message: &ChatMessage) -> bool {
        if self.admins.is_empty() {
            return true;
        }
        message
            .sender_id
            .as_ref()
            .map(|id| self.admins.contains(id))
            .unwrap_or(false)
    }

    async fn handle_command(
        &self,
        command: CensorshipCommand,
        message: &ChatMessage,
        platform: &dyn ChatPlatform,
    ) -> GuardOutcome {
        let accepted = self.is_admin(message);

        let reply = if !accepted {
            warn!(
                "Rejected {:?} from non-admin {:?} in chat {}",
                command, message.sender_id, message.chat_id
            );
            "You are not an admin to execute this command".to_string()
        } else {
            match command {
                CensorshipCommand::Start => {
                    self.switch.activate(&message.chat_id).await;
                    "Election content filter activated for this chat.".to_string()
                }
                CensorshipCommand::Stop => {
                    self.switch.deactivate(&message.chat_id).await;
                    "Election content filter deactivated for this chat.".to_string()
                }
                CensorshipCommand::Check => {
                    let status = match self.switch.status(&message.chat_id).await {
                        CensorshipStatus::Active => "active",
                        CensorshipStatus::Inactive => "inactive",
                        CensorshipStatus::NotSet => "not set",
                    };
                    format!("Election content filter status for this chat: {}", status)
                }
            }
        };

        if let Err(e) = platform
            .send_message(&message.chat_id, message.thread_id, &reply)
            .await
        {
            warn!("Failed to answer {:?} in chat {}: {:#}", command, message.chat_id, e);
        }

        GuardOutcome::Command { command, accepted }
    }
}

/// Notice posted after a message is removed
pub fn removal_notice(message: &ChatMessage) -> String {
    let what = if message.edited {
        "your edited message"
    } else {
        "your message"
    };
    format!(
        "{}, {} was deleted as it contained election-related content.",
        message.display_name(),
        what
    )
}
