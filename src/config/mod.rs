// src/config/mod.rs - Configuration management with hot-reload

use anyhow::{Context, Result};
use log::{debug, error, info};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;

use crate::bot::keywords::KeywordSet;

pub const MODERATION_FILE: &str = "moderation.yaml";
pub const KEYWORDS_FILE: &str = "keywords.yaml";

/// Main configuration manager for the files under the config directory
#[derive(Clone)]
pub struct ConfigurationManager {
    /// Base directory for all configuration files
    config_dir: PathBuf,

    moderation_config: Arc<RwLock<ModerationConfig>>,
    keyword_set: Arc<RwLock<KeywordSet>>,

    /// File watchers for hot-reloading
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,

    /// Event broadcaster for configuration changes
    change_notifier: broadcast::Sender<ConfigChangeEvent>,

    last_reload: Arc<RwLock<std::time::Instant>>,
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone)]
pub enum ConfigChangeEvent {
    ModerationUpdated { file: String },
    KeywordsUpdated { file: String, version: String },
    ValidationError { file: String, error: String },
    ReloadComplete { files_updated: Vec<String> },
}

/// Settings for the moderation pipeline, stored in `moderation.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sender_window: SenderWindowConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub rules: RuleToggles,
    #[serde(default)]
    pub censorship: CensorshipConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file for verdicts; `None` keeps verdicts in memory only
    pub path: Option<PathBuf>,
    /// Drop all non-flagged verdicts when the process starts
    pub purge_allowed_on_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("data/verdicts.db")),
            purge_allowed_on_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderWindowConfig {
    /// Quiet time after which a sender's buffer starts over
    pub idle_secs: u64,
    /// Short messages kept per sender
    pub buffer_cap: usize,
    /// Senders tracked at once before the least recently active is evicted
    pub max_senders: usize,
    /// Senders idle longer than this are evicted first
    pub ttl_secs: u64,
}

impl Default for SenderWindowConfig {
    fn default() -> Self {
        Self {
            idle_secs: 300,
            buffer_cap: 30,
            max_senders: 10_000,
            ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Reply token cap. Reasoning models spend tokens thinking before they
    /// answer, so leave unset unless the model answers directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Per-chat call budget; `None` disables the limit
    pub calls_per_window: Option<u32>,
    pub window_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "qwen/qwen3-4b:free".to_string(),
            temperature: 0.1,
            max_tokens: None,
            timeout_secs: 10,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            calls_per_window: Some(200),
            window_secs: 3600,
        }
    }
}

/// Switches for the heuristic stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleToggles {
    /// Acrostic and ASCII-art detection
    pub structural: bool,
    /// Split-message tracking per sender
    pub sequence: bool,
    /// Indirect campaign rhetoric in the lexical stage
    pub rhetorical: bool,
    /// Cache the text of a message that completed a split sequence
    pub cache_sequence_hits: bool,
}

impl Default for RuleToggles {
    fn default() -> Self {
        Self {
            structural: true,
            sequence: true,
            rhetorical: true,
            cache_sequence_hits: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CensorshipConfig {
    /// Whether chats that never toggled censorship are moderated
    pub default_active: bool,
    /// Sender ids allowed to toggle censorship; empty means anyone
    pub admins: Vec<String>,
}

impl ModerationConfig {
    pub fn validate(&self) -> Result<()> {
        let window = &self.sender_window;
        if window.idle_secs == 0 {
            return Err(anyhow::anyhow!("sender_window.idle_secs must be positive"));
        }
        if window.buffer_cap == 0 {
            return Err(anyhow::anyhow!("sender_window.buffer_cap must be positive"));
        }
        if window.max_senders == 0 {
            return Err(anyhow::anyhow!("sender_window.max_senders must be positive"));
        }

        let classifier = &self.classifier;
        if !(0.0..=2.0).contains(&classifier.temperature) {
            return Err(anyhow::anyhow!(
                "classifier.temperature {} outside 0.0-2.0",
                classifier.temperature
            ));
        }
        if classifier.max_tokens == Some(0) {
            return Err(anyhow::anyhow!("classifier.max_tokens must be positive when set"));
        }
        if classifier.timeout_secs == 0 {
            return Err(anyhow::anyhow!("classifier.timeout_secs must be positive"));
        }
        if classifier.calls_per_window == Some(0) {
            return Err(anyhow::anyhow!(
                "classifier.calls_per_window of 0 would never call the classifier; disable it instead"
            ));
        }
        if classifier.enabled && classifier.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("classifier.base_url is empty"));
        }

        Ok(())
    }
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            moderation_config: Arc::new(RwLock::new(ModerationConfig::default())),
            keyword_set: Arc::new(RwLock::new(KeywordSet::default())),
            watchers: Arc::new(RwLock::new(Vec::new())),
            change_notifier: tx,
            last_reload: Arc::new(RwLock::new(std::time::Instant::now())),
        }
    }

    /// Load (or create) every config file
    pub async fn initialize(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).await?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        self.load_all_configs().await?;

        info!("Configuration manager initialized from {}", self.config_dir.display());
        Ok(())
    }

    /// Initialize and keep watching the config directory
    pub async fn initialize_with_watch(&self) -> Result<()> {
        self.initialize().await?;
        self.setup_file_watchers().await
    }

    async fn load_all_configs(&self) -> Result<()> {
        let mut files_loaded = Vec::new();

        let moderation_path = self.config_dir.join(MODERATION_FILE);
        if moderation_path.exists() {
            let config = Self::read_moderation_config(&moderation_path).await?;
            *self.moderation_config.write().await = config;
            files_loaded.push(MODERATION_FILE.to_string());
        } else {
            self.create_default_moderation_config().await?;
            files_loaded.push(format!("{} (created default)", MODERATION_FILE));
        }

        let keywords_path = self.config_dir.join(KEYWORDS_FILE);
        if keywords_path.exists() {
            let set = Self::read_keyword_set(&keywords_path).await?;
            *self.keyword_set.write().await = set;
            files_loaded.push(KEYWORDS_FILE.to_string());
        } else {
            self.create_default_keyword_set().await?;
            files_loaded.push(format!("{} (created default)", KEYWORDS_FILE));
        }

        let _ = self
            .change_notifier
            .send(ConfigChangeEvent::ReloadComplete { files_updated: files_loaded });

        Ok(())
    }

    async fn read_moderation_config(path: &Path) -> Result<ModerationConfig> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ModerationConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        debug!("Loaded moderation configuration from {}", path.display());
        Ok(config)
    }

    async fn read_keyword_set(path: &Path) -> Result<KeywordSet> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let set: KeywordSet = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        set.validate()?;
        debug!("Loaded keyword set '{}' from {}", set.version, path.display());
        Ok(set)
    }

    async fn create_default_moderation_config(&self) -> Result<()> {
        let config = ModerationConfig::default();
        let config_path = self.config_dir.join(MODERATION_FILE);
        fs::write(&config_path, serde_yaml::to_string(&config)?).await?;

        *self.moderation_config.write().await = config;
        info!("Created default moderation configuration: {}", config_path.display());
        Ok(())
    }

    async fn create_default_keyword_set(&self) -> Result<()> {
        let set = KeywordSet::default();
        let config_path = self.config_dir.join(KEYWORDS_FILE);
        fs::write(&config_path, serde_yaml::to_string(&set)?).await?;

        *self.keyword_set.write().await = set;
        info!("Created default keyword set: {}", config_path.display());
        Ok(())
    }

    /// Setup file watchers for hot-reloading
    async fn setup_file_watchers(&self) -> Result<()> {
        let config_dir = self.config_dir.clone();
        let change_notifier = self.change_notifier.clone();
        let moderation_config = self.moderation_config.clone();
        let keyword_set = self.keyword_set.clone();
        let last_reload = self.last_reload.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;

        // Dropping the watcher stops notifications
        self.watchers.write().await.push(watcher);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Debounce rapid file changes
                {
                    let now = std::time::Instant::now();
                    let last = *last_reload.read().await;
                    if now.duration_since(last) < Duration::from_millis(500) {
                        continue;
                    }
                    *last_reload.write().await = now;
                }

                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                for path in event.paths {
                    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };

                    let outcome = match filename {
                        MODERATION_FILE | "moderation.yml" => {
                            info!("Moderation configuration changed, reloading...");
                            match Self::read_moderation_config(&path).await {
                                Ok(config) => {
                                    *moderation_config.write().await = config;
                                    Ok(ConfigChangeEvent::ModerationUpdated {
                                        file: filename.to_string(),
                                    })
                                }
                                Err(e) => Err(e),
                            }
                        }
                        KEYWORDS_FILE | "keywords.yml" => {
                            info!("Keyword set changed, reloading...");
                            match Self::read_keyword_set(&path).await {
                                Ok(set) => {
                                    let version = set.version.clone();
                                    *keyword_set.write().await = set;
                                    Ok(ConfigChangeEvent::KeywordsUpdated {
                                        file: filename.to_string(),
                                        version,
                                    })
                                }
                                Err(e) => Err(e),
                            }
                        }
                        _ => {
                            debug!("Ignoring change to non-config file: {}", filename);
                            continue;
                        }
                    };

                    let event = match outcome {
                        Ok(event) => event,
                        Err(e) => {
                            error!("Failed to reload {}: {:#}", filename, e);
                            ConfigChangeEvent::ValidationError {
                                file: filename.to_string(),
                                error: e.to_string(),
                            }
                        }
                    };
                    let _ = change_notifier.send(event);
                }
            }
        });

        info!("File watchers setup for hot-reloading");
        Ok(())
    }

    pub async fn get_moderation_config(&self) -> ModerationConfig {
        self.moderation_config.read().await.clone()
    }

    pub async fn get_keyword_set(&self) -> KeywordSet {
        self.keyword_set.read().await.clone()
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    /// Validate and write a new keyword set, then announce it
    pub async fn save_keyword_set(&self, set: KeywordSet) -> Result<()> {
        set.validate()?;

        let config_path = self.config_dir.join(KEYWORDS_FILE);
        fs::write(&config_path, serde_yaml::to_string(&set)?).await?;

        let version = set.version.clone();
        *self.keyword_set.write().await = set;
        let _ = self.change_notifier.send(ConfigChangeEvent::KeywordsUpdated {
            file: KEYWORDS_FILE.to_string(),
            version: version.clone(),
        });

        info!("Saved keyword set '{}' to {}", version, config_path.display());
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}
