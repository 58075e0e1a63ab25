use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use axum::Router;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::{Method, header::CONTENT_TYPE};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use sonic_gateway::{
    ServerConfig,
    audio::{WavCapture, WavPlayback},
    core::sonic::{
        AudioChunk, BedrockConnector, INPUT_CHUNK_FRAMES, INPUT_SAMPLE_RATE, SessionStatus,
        SonicError, SonicVoice, StreamManager, TextOutput,
    },
    core::tools::{ToolRegistry, ToolSet},
    routes,
    state::AppState,
};

/// Sonic Gateway - Nova Sonic speech-to-speech session server
#[derive(Parser, Debug)]
#[command(name = "sonic-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the companion WebSocket server
    Serve,

    /// Talk to Nova Sonic using WAV files as microphone and speaker
    Chat {
        /// 16kHz mono 16-bit WAV file streamed as microphone input
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// WAV file receiving the assistant's 24kHz audio
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Output voice (matthew, tiffany, amy)
        #[arg(long = "voice")]
        voice: Option<String>,

        /// Tool set (order_support, companion, all, none)
        #[arg(long = "tools")]
        tools: Option<String>,

        /// Typed user turn sent before the audio
        #[arg(long = "text")]
        text: Option<String>,

        /// Seconds of silence streamed after the file so the model can answer
        #[arg(long = "tail-secs", default_value_t = 8)]
        tail_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Chat {
            input,
            output,
            voice,
            tools,
            text,
            tail_secs,
        } => {
            chat(
                config,
                ChatArgs {
                    input,
                    output,
                    voice,
                    tools,
                    text,
                    tail: Duration::from_secs(tail_secs),
                },
            )
            .await
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let address = config.address();
    let cors_origins = config.cors_allowed_origins.clone();
    println!("Starting server on {address}");

    let app_state = AppState::new(config).map_err(|e| anyhow!(e.to_string()))?;

    // Configure CORS
    let cors_layer = if let Some(ref origins) = cors_origins {
        if origins == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
                .allow_credentials(false)
        } else {
            // Parse comma-separated origins
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
                .allow_credentials(true)
        }
    } else {
        info!(
            "CORS not configured, defaulting to same-origin only. \
             Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
        );
        CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE])
            .allow_credentials(false)
    };

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = Router::new()
        .merge(routes::api::create_api_router())
        .merge(routes::sonic::create_sonic_router())
        .with_state(app_state)
        .layer(cors_layer)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    println!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

struct ChatArgs {
    input: PathBuf,
    output: PathBuf,
    voice: Option<String>,
    tools: Option<String>,
    text: Option<String>,
    tail: Duration,
}

async fn chat(config: ServerConfig, args: ChatArgs) -> anyhow::Result<()> {
    let mut sonic_config = config.sonic.clone();
    if let Some(voice) = args.voice.as_deref() {
        sonic_config.voice = SonicVoice::parse(voice)?;
    }

    let mut tool_settings = config.tools.clone();
    if let Some(set) = args.tools.as_deref() {
        tool_settings.set = ToolSet::parse(set)?;
    }
    let tools = Arc::new(ToolRegistry::from_settings(&tool_settings)?);
    info!(tools = ?tools.names(), "Tools registered");

    let connector = Arc::new(BedrockConnector::new(config.aws_credentials()));
    let manager = Arc::new(StreamManager::new(sonic_config, connector, tools));

    let playback = WavPlayback::create(&args.output)?;
    let mut capture = WavCapture::open(&args.input, true)?;

    let (ended_tx, mut ended_rx) = watch::channel(false);
    register_chat_callbacks(&manager, playback.sender(), ended_tx);

    manager.initialize().await?;
    if let Some(text) = args.text.as_deref() {
        manager.send_text(text).await?;
    }
    manager.start_audio_input().await?;
    println!("Streaming {} ...", args.input.display());

    while let Some(chunk) = capture.next_chunk().await {
        if *ended_rx.borrow() {
            break;
        }
        send_chat_audio(&manager, chunk).await;
    }

    // keep the microphone open with silence so the model detects the end of
    // the turn and finishes its answer
    let silence = Bytes::from(vec![0u8; INPUT_CHUNK_FRAMES * 2]);
    let chunk_duration =
        Duration::from_secs_f64(INPUT_CHUNK_FRAMES as f64 / f64::from(INPUT_SAMPLE_RATE));
    let deadline = tokio::time::Instant::now() + args.tail;
    let mut ticker = tokio::time::interval(chunk_duration);
    while tokio::time::Instant::now() < deadline && !*ended_rx.borrow() {
        tokio::select! {
            _ = ticker.tick() => send_chat_audio(&manager, silence.clone()).await,
            _ = ended_rx.changed() => break,
        }
    }

    manager.close().await;
    let frames_in = capture.finish().await?;
    // releases the playback sender held by the audio callback
    drop(manager);
    let frames_out = playback.finish().await?;

    println!(
        "Done: streamed {:.1}s of input, wrote {:.1}s of assistant audio to {}",
        frames_in as f64 / f64::from(INPUT_SAMPLE_RATE),
        frames_out as f64 / f64::from(sonic_gateway::core::sonic::OUTPUT_SAMPLE_RATE),
        args.output.display()
    );
    Ok(())
}

fn register_chat_callbacks(
    manager: &StreamManager,
    audio_tx: tokio::sync::mpsc::UnboundedSender<Bytes>,
    ended_tx: watch::Sender<bool>,
) {
    manager.on_text(Arc::new(|output: TextOutput| {
        Box::pin(async move {
            let marker = if output.speculative { " (speculative)" } else { "" };
            println!("{}{}: {}", output.role, marker, output.text);
        })
    }));

    manager.on_audio(Arc::new(move |chunk: AudioChunk| {
        let audio_tx = audio_tx.clone();
        Box::pin(async move {
            if audio_tx.send(chunk.data).is_err() {
                warn!("Playback writer is gone, dropping audio");
            }
        })
    }));

    manager.on_latency(Arc::new(|latency: Duration| {
        Box::pin(async move {
            info!("Response latency: {:.3}s", latency.as_secs_f64());
        })
    }));

    let ended_tx = Arc::new(ended_tx);
    manager.on_status(Arc::new(move |status: SessionStatus| {
        let ended_tx = ended_tx.clone();
        Box::pin(async move {
            info!(status = status.code(), "{}", status);
            if matches!(
                status,
                SessionStatus::Failed { .. } | SessionStatus::Completed
            ) {
                let _ = ended_tx.send(true);
            }
        })
    }));

    manager.on_error(Arc::new(|error: SonicError| {
        Box::pin(async move {
            warn!("Session error: {}", error);
        })
    }));
}

async fn send_chat_audio(manager: &StreamManager, chunk: Bytes) {
    match manager.send_audio_chunk(chunk).await {
        Ok(()) => {}
        Err(SonicError::NotActive) | Err(SonicError::Lifecycle(_)) => {}
        Err(e) => warn!("Failed to send audio: {}", e),
    }
}
