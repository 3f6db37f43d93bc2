use anyhow::{Context, Result};
use async_trait::async_trait;
use emodiary_schemas::DialogueTurn;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::parse::clean_model_output;

/// Temperature for user-facing response generation.
pub const RESPONSE_TEMPERATURE: f32 = 0.5;
/// Temperature for structured criteria/classification analysis.
pub const ANALYSIS_TEMPERATURE: f32 = 0.1;

/// The text-generation collaborator. May fail or return empty text at any
/// time (rate limit, network, content policy); every call site must treat
/// that as a recoverable condition.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        turns: &[DialogueTurn],
        temperature: f32,
    ) -> Result<String>;
}

/// Configuration for the chat completion backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmProvider {
    Ollama,
    OpenAI,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            api_key: None,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let provider = std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "ollama".to_string())
            .to_lowercase();

        let provider = match provider.as_str() {
            "openai" => LlmProvider::OpenAI,
            _ => LlmProvider::Ollama,
        };

        let base_url = match provider {
            LlmProvider::Ollama => {
                std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
            }
            LlmProvider::OpenAI => std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
        };

        let model = match provider {
            LlmProvider::Ollama => {
                std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2:3b".to_string())
            }
            LlmProvider::OpenAI => {
                std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string())
            }
        };

        let api_key = if provider == LlmProvider::OpenAI {
            Some(
                std::env::var("OPENAI_API_KEY")
                    .context("OPENAI_API_KEY required for OpenAI provider")?,
            )
        } else {
            None
        };

        Ok(Self {
            provider,
            api_key,
            base_url,
            model,
            timeout_secs: 30,
        })
    }
}

/// Chat completion client for Ollama or OpenAI-compatible backends.
pub struct ChatClient {
    config: LlmConfig,
    client: Client,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, client })
    }

    async fn call_ollama(
        &self,
        system: &str,
        turns: &[DialogueTurn],
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url);

        // Ollama's generate endpoint takes one prompt; flatten the turns.
        let mut prompt = system.to_string();
        for turn in turns {
            prompt.push_str(&format!("\n{}: {}", turn.role.as_str(), turn.content));
        }

        let request_body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": 1024,
            }
        });

        debug!("Calling Ollama at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .context("Failed to call Ollama API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error {}: {}", status, error_text);
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            response: String,
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    async fn call_openai(
        &self,
        system: &str,
        turns: &[DialogueTurn],
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let mut messages = vec![json!({ "role": "system", "content": system })];
        for turn in turns {
            messages.push(json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            }));
        }

        let request_body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": 1024,
        });

        debug!("Calling OpenAI at {}", url);

        let mut request = self.client.post(&url).json(&request_body);

        if let Some(ref api_key) = self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.context("Failed to call OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {}: {}", status, error_text);
        }

        #[derive(Deserialize)]
        struct OpenAIResponse {
            choices: Vec<OpenAIChoice>,
        }

        #[derive(Deserialize)]
        struct OpenAIChoice {
            message: OpenAIMessage,
        }

        #[derive(Deserialize)]
        struct OpenAIMessage {
            content: String,
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        openai_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from OpenAI"))
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn generate(
        &self,
        system: &str,
        turns: &[DialogueTurn],
        temperature: f32,
    ) -> Result<String> {
        match self.config.provider {
            LlmProvider::Ollama => self.call_ollama(system, turns, temperature).await,
            LlmProvider::OpenAI => self.call_openai(system, turns, temperature).await,
        }
    }
}

/// Conversational generation: the instruction and diary seed the system
/// prompt, the dialogue rides along as chat turns. Empty model output is an
/// error so call sites can treat it as a hard failure.
pub async fn generate_response(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    instruction: &str,
) -> Result<String> {
    let system = format!("{}\nUser's diary: {}", instruction, diary);
    let raw = llm
        .generate(&system, dialogue, RESPONSE_TEMPERATURE)
        .await?;
    let cleaned = clean_model_output(&raw);
    if cleaned.trim().is_empty() {
        anyhow::bail!("empty model response");
    }
    Ok(cleaned)
}

/// Structured analysis: the whole dialogue is serialized into the system
/// prompt and the model is queried at low temperature.
pub async fn generate_analysis(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    instruction: &str,
) -> Result<String> {
    let dialogue_json = serde_json::to_string(dialogue).unwrap_or_else(|_| "[]".to_string());
    let system = format!(
        "{}\nUser's diary: {}\nDialog: {}",
        instruction, diary, dialogue_json
    );
    let raw = llm.generate(&system, &[], ANALYSIS_TEMPERATURE).await?;
    let cleaned = clean_model_output(&raw);
    if cleaned.trim().is_empty() {
        anyhow::bail!("empty model response");
    }
    Ok(cleaned)
}
