use std::{net::SocketAddr, sync::Arc};

use llm_core::LlmClient;
use server::{build_router, config::ServerConfig, AppState};
use speech_core::{PiperSynthesizer, RodioPlayer, Segmenter, SpeechConfig, VoiceMap};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech server...");

    let config = ServerConfig::from_env();
    let speech_config = SpeechConfig::from_env();

    let llm = match LlmClient::new(config.llm_provider, &config.llm_model) {
        Ok(client) => {
            let client = client.with_stop_sequences(config.llm_stop_sequences.clone());
            let client = match &config.llm_base_url {
                Some(url) => client.with_base_url(url),
                None => client,
            };
            info!(
                "LLM provider={} model={}",
                client.provider().as_str(),
                client.model()
            );
            Some(client)
        }
        Err(e) => {
            warn!("LLM disabled, /chat will fail: {e:#}");
            None
        }
    };

    info!("Loading voice map from {}...", config.tts_map_path);
    let voices = VoiceMap::from_file(&config.tts_map_path).unwrap_or_else(|e| {
        warn!("Could not load {}: {e:#}, using empty map.", config.tts_map_path);
        VoiceMap::default()
    });
    let languages = voices.languages();
    info!("Loaded {} voice language(s)", languages.len());

    let synthesizer = PiperSynthesizer::new(voices, speech_config.language.clone());
    let synthesizer = Arc::new(match &speech_config.voice {
        Some(voice) => synthesizer.with_voice(voice.clone()),
        None => synthesizer,
    });
    let preload = Arc::clone(&synthesizer);
    match tokio::task::spawn_blocking(move || preload.preload()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Voice not preloaded: {e:#}"),
        Err(e) => warn!("Voice preload task failed: {e}"),
    }

    let player = Arc::new(RodioPlayer::new(speech_config.volume));
    let segmenter = Segmenter::spawn(synthesizer, player, &speech_config);

    let state = AppState::new(segmenter, languages, llm, config.clone());
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, llm_timeout={}s",
        config.port, config.rate_limit_per_minute, config.llm_timeout_secs
    );

    let app = build_router(state)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
