// Configuration for the HTTP front end

use std::time::Duration;

use llm_core::{LlmProvider, DEFAULT_STOP_SEQUENCE, DEFAULT_SYSTEM_PROMPT};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub llm_provider: LlmProvider,
    /// Empty means the provider's default model.
    pub llm_model: String,
    pub llm_base_url: Option<String>,
    pub llm_timeout_secs: u64,
    /// Generation stops at the first of these.
    pub llm_stop_sequences: Vec<String>,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub tts_map_path: String,
    pub system_prompt: String,
    pub max_history_turns: usize,
    pub max_conversations: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            llm_provider: LlmProvider::OpenAI,
            llm_model: String::new(),
            llm_base_url: None,
            llm_timeout_secs: 120,
            llm_stop_sequences: vec![DEFAULT_STOP_SEQUENCE.to_string()],
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            tts_map_path: "models/map.json".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history_turns: 20,
            max_conversations: 1000,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let rate_limit_per_minute = std::env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.rate_limit_per_minute);

        let llm_provider = std::env::var("LLM_PROVIDER")
            .map(|v| LlmProvider::from_name(&v))
            .unwrap_or(defaults.llm_provider);

        let llm_model = std::env::var("LLM_MODEL").unwrap_or_default();

        let llm_base_url = std::env::var("LLM_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let llm_timeout_secs = std::env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.llm_timeout_secs);

        let llm_stop_sequences = std::env::var("LLM_STOP_SEQUENCES")
            .ok()
            .map(|v| split_list(&v))
            .filter(|stops| !stops.is_empty())
            .unwrap_or(defaults.llm_stop_sequences);

        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.request_timeout_secs);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| split_list(&origins));

        let tts_map_path = std::env::var("TTS_MAP_PATH").unwrap_or(defaults.tts_map_path);

        let system_prompt = std::env::var("SYSTEM_PROMPT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.system_prompt);

        let max_history_turns = std::env::var("MAX_HISTORY_TURNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_history_turns);

        let max_conversations = std::env::var("MAX_CONVERSATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.max_conversations);

        Self {
            port,
            rate_limit_per_minute,
            llm_provider,
            llm_model,
            llm_base_url,
            llm_timeout_secs,
            llm_stop_sequences,
            request_timeout_secs,
            cors_allowed_origins,
            tts_map_path,
            system_prompt,
            max_history_turns,
            max_conversations,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

/// Comma separated, blanks dropped.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
