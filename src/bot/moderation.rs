// src/bot/moderation.rs - Staged election-content moderation

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::bot::classifier::{ClassifierBudget, ClassifierError, ContentClassifier, LlmClassifier};
use crate::bot::decision_cache::DecisionCache;
use crate::bot::keyword_matching::KeywordMatcher;
use crate::bot::keywords::{KeywordSet, KeywordSetError};
use crate::bot::pattern_matching::{StructuralDetector, StructuralPattern};
use crate::bot::sequence_tracker::{SequenceTracker, SHORT_MESSAGE_MAX_CHARS};
use crate::config::{ModerationConfig, RuleToggles, SenderWindowConfig};
use crate::types::{Decision, DecisionSource};

/// Budget key for evaluations made without a chat id
const GLOBAL_BUDGET_KEY: &str = "*";

/// Keyword-derived matchers plus the toggles they were compiled under.
/// Swapped as a unit on reload so one evaluation never sees a mix.
struct CompiledRules {
    matcher: KeywordMatcher,
    detector: StructuralDetector,
    toggles: RuleToggles,
}

impl CompiledRules {
    fn compile(set: &KeywordSet, toggles: RuleToggles) -> Result<Self, KeywordSetError> {
        let matcher = KeywordMatcher::compile(set)?.with_rhetorical(toggles.rhetorical);
        let detector = StructuralDetector::new(&set.acronyms)?;
        Ok(Self {
            matcher,
            detector,
            toggles,
        })
    }
}

/// Decides whether a message is election-related.
///
/// Stages run cheapest first and stop at the first positive:
/// cache, structural layout, split-message sequence, keywords, then the
/// remote classifier. Local positives are trusted and cached; the classifier
/// is cached only when it actually answered. Nothing here returns an error:
/// any failure along the way allows the message.
pub struct ElectionModerator {
    cache: DecisionCache,
    rules: RwLock<Arc<CompiledRules>>,
    tracker: SequenceTracker,
    classifier: Option<Arc<dyn ContentClassifier>>,
    budget: Option<ClassifierBudget>,
}

impl ElectionModerator {
    pub fn new(
        cache: DecisionCache,
        keywords: &KeywordSet,
        toggles: RuleToggles,
        window: &SenderWindowConfig,
    ) -> Result<Self, KeywordSetError> {
        let rules = CompiledRules::compile(keywords, toggles)?;
        info!(
            "Election moderator ready with keyword set '{}'",
            rules.matcher.version()
        );

        Ok(Self {
            cache,
            rules: RwLock::new(Arc::new(rules)),
            tracker: SequenceTracker::new(window),
            classifier: None,
            budget: None,
        })
    }

    /// Build from configuration. A classifier without an API key is skipped,
    /// leaving the moderator on local rules only.
    pub fn from_config(
        config: &ModerationConfig,
        keywords: &KeywordSet,
        cache: DecisionCache,
    ) -> Result<Self> {
        let mut moderator = Self::new(cache, keywords, config.rules.clone(), &config.sender_window)?;

        if config.classifier.enabled {
            match LlmClassifier::from_env(&config.classifier) {
                Ok(classifier) => {
                    info!("Remote classifier enabled: {}", classifier.name());
                    moderator = moderator.with_classifier(Arc::new(classifier));
                }
                Err(ClassifierError::MissingApiKey(var)) => {
                    warn!("{} not set, remote classifier disabled", var);
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            info!("Remote classifier disabled in configuration");
        }

        if let Some(calls) = config.classifier.calls_per_window {
            moderator = moderator.with_budget(ClassifierBudget::new(
                calls,
                Duration::from_secs(config.classifier.window_secs),
            ));
        }

        Ok(moderator)
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ContentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_budget(mut self, budget: ClassifierBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub async fn keyword_version(&self) -> String {
        self.rules.read().await.matcher.version().to_string()
    }

    pub async fn rule_toggles(&self) -> RuleToggles {
        self.rules.read().await.toggles.clone()
    }

    /// Recompile with a new keyword set, keeping the current toggles.
    /// On error the running rules stay in place.
    pub async fn reload_keywords(&self, keywords: &KeywordSet) -> Result<(), KeywordSetError> {
        let toggles = self.rule_toggles().await;
        let rules = CompiledRules::compile(keywords, toggles)?;
        *self.rules.write().await = Arc::new(rules);
        info!("Keyword set reloaded: '{}'", keywords.version);
        Ok(())
    }

    pub async fn set_rules(&self, keywords: &KeywordSet, toggles: RuleToggles) -> Result<(), KeywordSetError> {
        let rules = CompiledRules::compile(keywords, toggles)?;
        *self.rules.write().await = Arc::new(rules);
        Ok(())
    }

    /// Verdict for a message: `true` means election-related
    pub async fn decide(&self, text: &str, sender_id: Option<&str>) -> bool {
        self.evaluate(None, text, sender_id).await.flagged
    }

    pub async fn decide_in_chat(&self, chat_id: &str, text: &str, sender_id: Option<&str>) -> bool {
        self.evaluate(Some(chat_id), text, sender_id).await.flagged
    }

    /// Verdict plus the stage that produced it
    pub async fn evaluate(&self, chat_id: Option<&str>, text: &str, sender_id: Option<&str>) -> Decision {
        if text.trim().is_empty() {
            return Decision::allowed(DecisionSource::EmptyInput);
        }

        if let Some(flagged) = self.cache.lookup(text).await {
            debug!("Cache hit: flagged={}", flagged);
            return Decision {
                flagged,
                source: DecisionSource::Cache,
            };
        }

        // Snapshot so a concurrent reload can't change rules mid-evaluation
        let rules = self.rules.read().await.clone();

        if rules.toggles.structural {
            if let Some(pattern) = rules.detector.detect(text) {
                let source = match pattern {
                    StructuralPattern::Acrostic => DecisionSource::Acrostic,
                    StructuralPattern::AsciiArt => DecisionSource::AsciiArt,
                };
                return self.flag(text, source, true).await;
            }
        }

        if rules.toggles.sequence {
            if let Some(sender) = sender_id {
                if self.tracker.observe(sender, text, &rules.matcher).await {
                    return self
                        .flag(text, DecisionSource::SplitSequence, rules.toggles.cache_sequence_hits)
                        .await;
                }
            }
        }

        if let Some(hit) = rules.matcher.find(text) {
            debug!("Keyword hit {:?}: '{}'", hit.rule, hit.matched);
            return self.flag(text, DecisionSource::Keyword(hit.rule), true).await;
        }

        self.ask_classifier(chat_id, text, &rules).await
    }

    async fn flag(&self, text: &str, source: DecisionSource, cache: bool) -> Decision {
        info!("Message flagged by {}", source);
        if cache {
            self.cache.record(text, true).await;
        }
        Decision::flagged(source)
    }

    async fn ask_classifier(&self, chat_id: Option<&str>, text: &str, rules: &CompiledRules) -> Decision {
        let Some(classifier) = &self.classifier else {
            return Decision::allowed(DecisionSource::ClassifierDisabled);
        };

        if let Some(budget) = &self.budget {
            if !budget.try_acquire(chat_id.unwrap_or(GLOBAL_BUDGET_KEY)).await {
                return Decision::allowed(DecisionSource::BudgetExhausted);
            }
        }

        match classifier.classify(text).await {
            Ok(true) => self.flag(text, DecisionSource::Classifier, true).await,
            Ok(false) => {
                // Caching a negative for a fragment would hide it from the sequence tracker
                let fragment = text.trim().chars().count() <= SHORT_MESSAGE_MAX_CHARS;
                if !(fragment && rules.toggles.sequence) {
                    self.cache.record(text, false).await;
                }
                Decision::allowed(DecisionSource::Classifier)
            }
            Err(e) => {
                warn!("Classifier {} failed, allowing message: {}", classifier.name(), e);
                Decision::allowed(DecisionSource::ClassifierFailed)
            }
        }
    }
}
