use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use llm_core::{ConversationStore, LlmClient};
use speech_core::Segmenter;

use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;

#[derive(Clone)]
pub struct AppState {
    pub segmenter: Arc<Segmenter>,
    /// Language keys of the loaded voice map
    pub voices: Arc<Vec<String>>,
    /// `None` when no language model is configured
    pub llm: Option<Arc<LlmClient>>,
    pub conversations: Arc<ConversationStore>,
    // Held for the whole of a producer run
    pub producer: Arc<tokio::sync::Mutex<()>>,
    pub request_count: Arc<AtomicU64>,
    pub metrics: Arc<ServerMetrics>,
    pub config: ServerConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        segmenter: Segmenter,
        voices: Vec<String>,
        llm: Option<LlmClient>,
        config: ServerConfig,
    ) -> Self {
        let conversations = ConversationStore::new(
            config.system_prompt.clone(),
            config.max_history_turns,
            config.max_conversations,
        );
        Self {
            segmenter: Arc::new(segmenter),
            voices: Arc::new(voices),
            llm: llm.map(Arc::new),
            conversations: Arc::new(conversations),
            producer: Arc::new(tokio::sync::Mutex::new(())),
            request_count: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(ServerMetrics::default()),
            config,
            started_at: Instant::now(),
        }
    }
}
