// src/main.rs - Replays chat events from stdin through the message guard

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use ballotguard::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting ballotguard v{}", ballotguard::VERSION);

    let config_dir = std::env::var("BALLOTGUARD_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config_manager = Arc::new(ConfigurationManager::new(Path::new(&config_dir)));

    if let Err(e) = config_manager.initialize_with_watch().await {
        error!("Failed to initialize configuration system: {:#}", e);
        return Err(e);
    }

    let config = config_manager.get_moderation_config().await;
    let keywords = config_manager.get_keyword_set().await;

    let cache = open_cache(&config).await?;
    let moderator = Arc::new(ElectionModerator::from_config(&config, &keywords, cache)?);

    spawn_reload_listener(config_manager.clone(), moderator.clone());

    let switch = Arc::new(CensorshipSwitch::new(config.censorship.default_active));
    let guard = MessageGuard::new(moderator, switch).with_admins(config.censorship.admins.clone());
    let platform = LoggingPlatform::new();

    info!("Reading chat events from stdin (one JSON object per line)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    info!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<ChatMessage>(&line) {
                    Ok(message) => {
                        let outcome = guard.handle(&message, &platform).await;
                        debug!("Message {} in chat {}: {:?}", message.message_id, message.chat_id, outcome);
                    }
                    Err(e) => warn!("Skipping malformed event: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Open the verdict store and drop allowed verdicts left over from the last run
async fn open_cache(config: &ModerationConfig) -> Result<DecisionCache> {
    let store: Arc<dyn VerdictStore> = match &config.cache.path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let store = SqliteVerdictStore::open(path)
                .with_context(|| format!("Failed to open verdict store {}", path.display()))?;
            info!("Verdict store: {}", path.display());
            Arc::new(store)
        }
        None => {
            warn!("No cache path configured, verdicts are kept in memory only");
            Arc::new(MemoryVerdictStore::new())
        }
    };

    let cache = DecisionCache::new(store);
    if config.cache.purge_allowed_on_start {
        if let Err(e) = cache.purge_allowed().await {
            warn!("Startup purge of allowed verdicts failed: {}", e);
        }
    }

    Ok(cache)
}

/// Apply keyword and rule changes from the config watcher to the running moderator
fn spawn_reload_listener(config_manager: Arc<ConfigurationManager>, moderator: Arc<ElectionModerator>) {
    let mut changes = config_manager.subscribe_to_changes();

    tokio::spawn(async move {
        loop {
            let event = match changes.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} configuration events", missed);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            match event {
                ConfigChangeEvent::KeywordsUpdated { version, .. } => {
                    let keywords = config_manager.get_keyword_set().await;
                    if let Err(e) = moderator.reload_keywords(&keywords).await {
                        error!("Keeping previous keyword set, '{}' failed to compile: {}", version, e);
                    }
                }
                ConfigChangeEvent::ModerationUpdated { .. } => {
                    let config = config_manager.get_moderation_config().await;
                    let keywords = config_manager.get_keyword_set().await;
                    match moderator.set_rules(&keywords, config.rules).await {
                        Ok(()) => info!("Rule toggles updated"),
                        Err(e) => error!("Failed to apply rule toggles: {}", e),
                    }
                }
                ConfigChangeEvent::ValidationError { file, error } => {
                    warn!("Ignoring invalid {}: {}", file, error);
                }
                ConfigChangeEvent::ReloadComplete { files_updated } => {
                    debug!("Configuration loaded: {:?}", files_updated);
                }
            }
        }
    });
}
