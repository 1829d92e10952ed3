use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::model::constants::{ENGINE_POLL_ATTEMPTS, ENGINE_POLL_INTERVAL_MS};

/// Seam for the summarization engine.
#[async_trait]
pub trait SummaryEngine: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String, Error>;
}

const SYSTEM_PROMPT_JA: &str = "あなたは会議の議事録を作成する優秀なアシスタントです。\
与えられた会話の文字起こしを分析し、簡潔で分かりやすい要約を作成してください。\n\
以下の形式で出力してください：\n\n\
## 概要\n## 主な議題\n## 決定事項\n## アクションアイテム\n## 補足";

const SYSTEM_PROMPT_EN: &str = "You are an excellent assistant for creating meeting minutes. \
Analyze the given conversation transcript and create a clear, concise summary.\n\
Output in the following format:\n\n\
## Overview\n## Main Topics\n## Decisions Made\n## Action Items\n## Additional Notes";

fn system_prompt(language: &str) -> &'static str {
    match language {
        "en" => SYSTEM_PROMPT_EN,
        _ => SYSTEM_PROMPT_JA,
    }
}

fn user_prompt(language: &str, transcript: &str) -> String {
    match language {
        "en" => format!(
            "Below is a meeting transcript. Please summarize it.\n\n---\n{}\n---",
            transcript
        ),
        _ => format!(
            "以下は会議の文字起こしです。これを要約してください。\n\n---\n{}\n---",
            transcript
        ),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    top_p: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// Client for a local Ollama instance.
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    model: String,
    language: String,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: config.ollama_host.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            language: config.summary_language.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> Result<Vec<String>, reqwest::Error> {
        let response: TagsResponse = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.models.into_iter().map(|tag| tag.name).collect())
    }

    /// Verify the engine is reachable and the configured model is
    /// pulled.  Human-readable diagnostics for the `check` command.
    pub async fn health_check(&self) -> Result<(), Error> {
        let names = self.list_models().await.map_err(|error| {
            Error::EngineUnavailable(format!(
                "cannot reach ollama at {}: {}",
                self.host, error
            ))
        })?;
        if model_matches(&names, &self.model) {
            Ok(())
        } else {
            Err(Error::EngineUnavailable(format!(
                "model {} not found; run `ollama pull {}`",
                self.model, self.model
            )))
        }
    }

    /// Idempotent health-check-and-wait.  If the engine is unreachable,
    /// launch `ollama serve` and poll with a bounded retry before
    /// giving up.  Safe to call when the engine is already up.
    pub async fn ensure_available(&self) -> Result<(), Error> {
        if self.list_models().await.is_ok() {
            return self.health_check().await;
        }

        info!(host = %self.host, "ollama unreachable, launching `ollama serve`");
        Command::new("ollama")
            .arg("serve")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                Error::EngineUnavailable(format!("failed to launch ollama: {}", error))
            })?;

        for attempt in 1..=ENGINE_POLL_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(ENGINE_POLL_INTERVAL_MS)).await;
            if self.list_models().await.is_ok() {
                info!(attempt, "ollama became reachable");
                return self.health_check().await;
            }
        }
        Err(Error::EngineUnavailable(format!(
            "ollama did not become reachable at {} after {} attempts",
            self.host, ENGINE_POLL_ATTEMPTS
        )))
    }
}

#[async_trait]
impl SummaryEngine for OllamaClient {
    async fn summarize(&self, transcript: &str) -> Result<String, Error> {
        if transcript.trim().is_empty() {
            return Err(Error::SummarizationFailed(
                "transcript is empty".to_string(),
            ));
        }

        let prompt = user_prompt(&self.language, transcript);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(&self.language),
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: 0.3,
                top_p: 0.9,
            },
        };

        info!(chars = transcript.len(), model = %self.model, "requesting summary");
        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                Error::SummarizationFailed(format!("cannot reach ollama: {}", error))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body, "ollama chat request failed");
            return Err(Error::SummarizationFailed(format!(
                "ollama returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|error| {
            Error::SummarizationFailed(format!("malformed ollama response: {}", error))
        })?;
        Ok(parsed.message.content)
    }
}

/// The model is considered available on an exact tag match or when a
/// pulled model shares the base name (`llama3.2:8b` matches `llama3.2`).
fn model_matches(available: &[String], wanted: &str) -> bool {
    let wanted_base = wanted.split(':').next().unwrap_or(wanted);
    available.iter().any(|name| {
        name == wanted || name.split(':').next() == Some(wanted_base)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn model_matching_accepts_exact_and_base_names() {
        let available = vec!["llama3.2:latest".to_string(), "qwen2:7b".to_string()];
        assert!(model_matches(&available, "llama3.2:8b"));
        assert!(model_matches(&available, "qwen2:7b"));
        assert!(!model_matches(&available, "mistral:7b"));
        assert!(!model_matches(&[], "llama3.2:8b"));
    }

    #[test]
    fn chat_request_serializes_to_the_ollama_shape() {
        let request = ChatRequest {
            model: "llama3.2:8b",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            stream: false,
            options: ChatOptions {
                temperature: 0.3,
                top_p: 0.9,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "llama3.2:8b");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["options"]["temperature"], 0.3);
    }

    #[test]
    fn prompt_language_selection() {
        assert!(system_prompt("en").starts_with("You are"));
        assert!(system_prompt("ja").contains("議事録"));
        // unknown languages fall back to the default
        assert_eq!(system_prompt("fr"), system_prompt("ja"));
        assert!(user_prompt("en", "text").contains("text"));
    }
}
