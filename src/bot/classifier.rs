// src/bot/classifier.rs - Hosted LLM election-content classifier

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ClassifierConfig;

/// Instruction sent with every classification request
pub const SYSTEM_PROMPT: &str = "You are a strict content moderator for a Singapore group chat during an \
election period. Decide whether the user's message is election-related. Answer YES if the message \
mentions or alludes to ANY of the following, in English, Chinese, Malay, Tamil, Singlish, slang, \
abbreviations, misspellings, leetspeak, or spaced-out letters:\n\
1. Political parties or their abbreviations: People's Action Party (PAP), Workers' Party (WP), \
Progress Singapore Party (PSP), Singapore Democratic Party (SDP), Red Dot United (RDU), Reform Party, \
National Solidarity Party, Singapore People's Party, People's Power Party, People's Alliance for Reform, \
Singapore Democratic Alliance, or any other party.\n\
2. Electoral processes: voting, ballots, polls, polling day, polling stations, campaigns, rallies, \
nomination day, cooling-off day, sample counts, results, manifestos, candidates, walkovers, GE2025 \
or any general election or by-election.\n\
3. Constituencies: any GRC or SMC, constituency names in an electoral context, boundary changes.\n\
4. Political figures: ministers, members of parliament, party leaders or candidates, by name, \
initials or nickname.\n\
5. Party symbols and colours: lightning bolts, hammers, party logos, flags or coloured emoji used to \
signal support.\n\
6. Indirect or coded campaigning: praise or criticism of the ruling party or the opposition, \
'alternative voices', 'checks and balances', 'years of leadership', 'real leaders working on the \
ground', mandates, supermajorities, or urging people whom to support.\n\
Answer NO for everything else, including general news, government services and policy discussion \
with no electoral angle. Respond with exactly one word: YES or NO.";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier API key not set in {0}")]
    MissingApiKey(String),
}

/// Model-backed verdict source. An `Err` means "no verdict", never "flagged".
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<bool, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<PromptMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct PromptMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Classifier speaking the OpenAI-compatible chat completions protocol
pub struct LlmClassifier {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig, api_key: String) -> Result<Self, ClassifierError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    /// Build from config, reading the API key from the configured environment variable
    pub fn from_env(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let api_key = env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ClassifierError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(config, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request<'a>(&'a self, text: &'a str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                PromptMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                PromptMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl ContentClassifier for LlmClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, text: &str) -> Result<bool, ClassifierError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(text))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClassifierError::Status { status, body });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| ClassifierError::Malformed("no message content".to_string()))?;

        let verdict = parse_verdict(&content)?;
        debug!("Classifier {} answered {} for message", self.model, verdict);
        Ok(verdict)
    }
}

impl LlmClassifier {
    fn transport_error(&self, error: reqwest::Error) -> ClassifierError {
        if error.is_timeout() {
            ClassifierError::Timeout(self.timeout)
        } else {
            ClassifierError::Transport(error)
        }
    }
}

/// Read a YES/NO answer. Reasoning blocks and surrounding punctuation are ignored.
pub fn parse_verdict(content: &str) -> Result<bool, ClassifierError> {
    let answer = match content.rfind("</think>") {
        Some(idx) => &content[idx + "</think>".len()..],
        None if content.contains("<think>") => {
            return Err(ClassifierError::Malformed(
                "reasoning cut off before an answer".to_string(),
            ))
        }
        None => content,
    };

    let answer = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_uppercase();

    match answer.as_str() {
        "YES" => Ok(true),
        "NO" => Ok(false),
        "" => Err(ClassifierError::Malformed("empty answer".to_string())),
        other => Err(ClassifierError::Malformed(format!(
            "unexpected answer '{}'",
            other.chars().take(40).collect::<String>()
        ))),
    }
}

/// Fixed-window cap on classifier calls per chat
pub struct ClassifierBudget {
    calls_per_window: u32,
    window: Duration,
    usage: Mutex<HashMap<String, (Instant, u32)>>,
}

impl ClassifierBudget {
    pub fn new(calls_per_window: u32, window: Duration) -> Self {
        Self {
            calls_per_window,
            window,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Take one call from the chat's budget; false if the window is used up
    pub async fn try_acquire(&self, chat_id: &str) -> bool {
        self.try_acquire_at(chat_id, Instant::now()).await
    }

    pub async fn try_acquire_at(&self, chat_id: &str, now: Instant) -> bool {
        let mut usage = self.usage.lock().await;

        // Drop stale windows so the map only holds recently active chats
        let window = self.window;
        usage.retain(|_, (started, _)| now.saturating_duration_since(*started) < window);

        let (_, used) = usage.entry(chat_id.to_string()).or_insert((now, 0));
        if *used >= self.calls_per_window {
            warn!(
                "Classifier budget exhausted for chat {} ({} calls per {:?})",
                chat_id, self.calls_per_window, self.window
            );
            return false;
        }

        *used += 1;
        true
    }

    pub async fn remaining(&self, chat_id: &str) -> u32 {
        let usage = self.usage.lock().await;
        match usage.get(chat_id) {
            Some((started, used)) if started.elapsed() < self.window => {
                self.calls_per_window.saturating_sub(*used)
            }
            _ => self.calls_per_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_answers() {
        assert!(parse_verdict("YES").unwrap());
        assert!(!parse_verdict("NO").unwrap());
        assert!(parse_verdict("  yes.\n").unwrap());
        assert!(!parse_verdict("\"No\"").unwrap());
    }

    #[test]
    fn test_parse_skips_reasoning_block() {
        let content = "<think>mentions a GRC, so yes</think>\nYES";
        assert!(parse_verdict(content).unwrap());
    }

    #[test]
    fn test_parse_truncated_reasoning() {
        let content = "<think>The user mentions a hammer, which could be the Workers' Party";
        assert!(matches!(parse_verdict(content), Err(ClassifierError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_unexpected_answers() {
        assert!(matches!(parse_verdict(""), Err(ClassifierError::Malformed(_))));
        assert!(matches!(parse_verdict("..."), Err(ClassifierError::Malformed(_))));
        assert!(matches!(
            parse_verdict("Yes, this is about the election"),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(parse_verdict("MAYBE"), Err(ClassifierError::Malformed(_))));
    }

    #[test]
    fn test_request_shape() {
        let classifier = LlmClassifier::new(&ClassifierConfig::default(), "key".to_string()).unwrap();
        let body = serde_json::to_value(classifier.build_request("hello")).unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert!(body["temperature"].as_f64().unwrap() < 0.5);
        // Uncapped by default so reasoning models can finish thinking
        assert!(body.get("max_tokens").is_none());

        let capped = ClassifierConfig {
            max_tokens: Some(512),
            ..ClassifierConfig::default()
        };
        let classifier_capped = LlmClassifier::new(&capped, "key".to_string()).unwrap();
        let body_capped = serde_json::to_value(classifier_capped.build_request("hello")).unwrap();
        assert_eq!(body_capped["max_tokens"], 512);
        assert!(classifier.endpoint().ends_with("/chat/completions"));
        assert!(!classifier.endpoint().contains("//chat"));
    }

    #[test]
    fn test_response_without_choices_parses() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(parsed.choices.is_empty());

        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.as_ref().unwrap().content.is_none());
    }

    #[test]
    fn test_missing_api_key() {
        let config = ClassifierConfig {
            api_key_env: "BALLOTGUARD_TEST_UNSET_KEY".to_string(),
            ..ClassifierConfig::default()
        };
        assert!(matches!(
            LlmClassifier::from_env(&config),
            Err(ClassifierError::MissingApiKey(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let config = ClassifierConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            timeout_secs: 2,
            ..ClassifierConfig::default()
        };
        let classifier = LlmClassifier::new(&config, "key".to_string()).unwrap();
        assert!(classifier.classify("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_budget_per_chat_window() {
        let budget = ClassifierBudget::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(budget.try_acquire_at("chat-a", start).await);
        assert!(budget.try_acquire_at("chat-a", start).await);
        assert!(!budget.try_acquire_at("chat-a", start).await);

        // Other chats are independent
        assert!(budget.try_acquire_at("chat-b", start).await);

        // New window
        assert!(budget.try_acquire_at("chat-a", start + Duration::from_secs(61)).await);
    }
}
