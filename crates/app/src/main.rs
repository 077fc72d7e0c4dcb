use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use viseme_core::{
    AppConfig, HttpSynthesizer, LivePublisher, LiveState, MouthShapePipeline, MouthShapeService,
    VisemeError,
};

mod chat;
mod server;

use chat::{ChatRelay, HttpChatBackend};
use server::AppState;

#[tokio::main]
async fn main() -> viseme_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            chat_api_key,
        } => run_serve(config, host, port, chat_api_key).await,
        Commands::Precompute { input, output } => run_precompute(&config, &input, &output),
    }
}

fn load_config(path: Option<&PathBuf>) -> viseme_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

async fn run_serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    chat_api_key: Option<String>,
) -> viseme_core::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if chat_api_key.is_some() {
        config.chat.api_key = chat_api_key;
    }

    let live_state = match &config.live.state_file {
        Some(path) => LiveState::with_mirror(path)?,
        None => LiveState::new(),
    };
    let publisher = LivePublisher::new(live_state, &config.live);
    let synthesizer = Arc::new(HttpSynthesizer::new(config.tts.clone())?);
    let service = Arc::new(MouthShapeService::new(
        synthesizer,
        &config.analysis,
        publisher,
    ));

    let chat = match config.chat.api_key.clone().filter(|key| !key.is_empty()) {
        Some(key) => {
            let backend = HttpChatBackend::new(&config.chat, key)?;
            Some(Arc::new(ChatRelay::new(
                Arc::new(backend),
                &config.chat.system_prompt,
            )))
        }
        None => {
            tracing::warn!("no chat api key configured, /api/ask is disabled");
            None
        }
    };

    if let Some(dir) = &config.server.assets_dir {
        tracing::info!(?dir, "serving front-end assets");
    }
    let app = server::router(AppState { service, chat }, &config.server);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, tts = %config.tts.endpoint, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn run_precompute(
    config: &AppConfig,
    input: &PathBuf,
    output: &PathBuf,
) -> viseme_core::Result<()> {
    tracing::info!(?input, ?output, "running precompute pipeline");

    let audio = std::fs::read(input)?;
    let track = MouthShapePipeline::new(&config.analysis).track(&audio)?;

    let json = serde_json::to_vec_pretty(&track)
        .map_err(|err| VisemeError::msg(format!("failed to serialise track: {err}")))?;
    std::fs::write(output, json)?;

    tracing::info!(
        duration = track.duration,
        frames = track.frame_count(),
        "wrote animation track"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Mouth animation from synthesized speech", long_about = None)]
struct Cli {
    /// JSON configuration file. Defaults are used when omitted.
    #[arg(short, long, global = true, env = "VISEME_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the mouth-shape HTTP API.
    Serve {
        /// Address to bind, overriding the configuration file.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overriding the configuration file.
        #[arg(short, long)]
        port: Option<u16>,
        /// API key for the chat completion service.
        #[arg(long, env = "CHAT_API_KEY", hide_env_values = true)]
        chat_api_key: Option<String>,
    },
    /// Build an animation track from a local WAV file.
    Precompute {
        /// Path to the audio file that should be analysed.
        input: PathBuf,
        /// Output path for the animation track JSON.
        output: PathBuf,
    },
}
