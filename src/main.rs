use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};
use voice_session::http::DeviceProfile;
use voice_session::{
    create_router, AppState, AudioBackendFactory, AuthToken, Config, SessionController,
    SessionDevices, SessionTarget, SettingsContext, VoicePersona,
};

#[derive(Parser)]
#[command(name = "voice-session", version, about = "Duplex voice streaming sessions")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/voice-session")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control service
    Serve,

    /// Run a single session in the foreground until Ctrl+C
    Stream {
        #[arg(long)]
        session_id: Option<String>,

        #[arg(long)]
        token: String,

        #[arg(long, default_value = "primary")]
        voice: VoicePersona,

        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        guided: bool,

        #[arg(long)]
        tone: bool,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    info!("Voice Session v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Voice service endpoint: {}", cfg.transport.endpoint);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Stream {
            session_id,
            token,
            voice,
            guided,
            tone,
            duration_secs,
        } => {
            let settings = SettingsContext {
                voice_persona: voice,
                guided_session: guided,
                tone_mode: tone,
            };
            let session_id =
                session_id.unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
            stream(
                cfg,
                SessionTarget::new(session_id, AuthToken::new(token), settings),
                duration_secs.map(Duration::from_secs),
            )
            .await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let state = AppState::new(
        cfg.session_config(),
        DeviceProfile {
            capture: cfg.capture_source(),
            playback: cfg.playback_target(),
        },
    );
    let app = create_router(state.clone());

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    state.stop_all().await;
    info!("All sessions stopped");

    Ok(())
}

async fn stream(cfg: Config, target: SessionTarget, limit: Option<Duration>) -> Result<()> {
    let capture = AudioBackendFactory::create_capture(&cfg.capture_source())?;
    let playback = AudioBackendFactory::create_playback(&cfg.playback_target(), &target.session_id)?;

    info!("Connecting to {}", target.redacted_url(&cfg.transport.endpoint));

    let session = SessionController::new(
        target,
        SessionDevices {
            capture,
            playback,
            leases: Default::default(),
        },
        cfg.session_config(),
    );

    session.start().await?;
    info!("Session {} is live. Press Ctrl+C to stop.", session.session_id());

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Stopping on Ctrl+C"),
        _ = deadline => info!("Duration elapsed"),
        _ = session.closed() => warn!("Session ended: {:?}", session.last_error()),
    }

    let stats = session.stop().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
