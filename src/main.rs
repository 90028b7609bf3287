use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mirrorme::api::dashboard_routes;
use mirrorme::approval::ApprovalQueue;
use mirrorme::audit::AuditLog;
use mirrorme::channels::{ChannelAdapter, ChannelManager, LocalChannel};
use mirrorme::config::EngineConfig;
use mirrorme::conversation::ConversationTracker;
use mirrorme::engine::DecisionEngine;
use mirrorme::generation::HttpGenerationClient;
use mirrorme::profile::ProfileStore;
use mirrorme::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    let user_id = std::env::var("MIRRORME_USER").unwrap_or_else(|_| "default".to_string());

    let generation_url = std::env::var("MIRRORME_GENERATION_URL").unwrap_or_else(|_| {
        eprintln!("Error: MIRRORME_GENERATION_URL not set");
        eprintln!("  export MIRRORME_GENERATION_URL=http://localhost:9000/generate");
        std::process::exit(1);
    });
    let generation_key = std::env::var("MIRRORME_GENERATION_API_KEY")
        .ok()
        .map(secrecy::SecretString::from);

    let ws_port: u16 = std::env::var("MIRRORME_WS_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("🪞 MirrorMe v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   User: {}", user_id);
    eprintln!("   Safety mode: {}", config.default_safety_mode.as_str());
    eprintln!("   Dashboard WS: ws://0.0.0.0:{}/ws", ws_port);
    eprintln!("   Approvals API: http://0.0.0.0:{}/api/approvals", ws_port);
    eprintln!("   Type '<contact>: <message>' and press Enter.\n");

    // ── Database ────────────────────────────────────────────────────
    let db_path =
        std::env::var("MIRRORME_DB_PATH").unwrap_or_else(|_| "./data/mirrorme.db".to_string());

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path);

    // ── Core services ───────────────────────────────────────────────
    let profiles = ProfileStore::new(Arc::clone(&db));
    profiles.ensure_bootstrap(&user_id).await?;

    let tracker = ConversationTracker::new(Arc::clone(&db));
    let queue = ApprovalQueue::open(Arc::clone(&db)).await?;
    let audit = Arc::new(AuditLog::new(Arc::clone(&db)));

    let generator = Arc::new(HttpGenerationClient::new(
        generation_url,
        generation_key,
        config.generation_timeout + Duration::from_secs(5),
    )?);

    let local = Arc::new(LocalChannel::new());
    let mut channels = ChannelManager::new();
    channels.register(Arc::clone(&local) as Arc<dyn ChannelAdapter>);
    let channels = Arc::new(channels);

    let engine = DecisionEngine::new(
        Arc::clone(&db),
        tracker,
        profiles,
        queue,
        audit,
        generator,
        Arc::clone(&channels),
        config,
        user_id.clone(),
    );

    let _sweep = engine.spawn_expiry_sweep();

    // ── Dashboard server ────────────────────────────────────────────
    let app = dashboard_routes(Arc::clone(&engine));
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", ws_port))
            .await
            .expect("Failed to bind dashboard port");
        tracing::info!(port = ws_port, "Dashboard server started");
        axum::serve(listener, app).await.ok();
    });

    // ── Event pump ──────────────────────────────────────────────────
    let mut events = local.start().await?;
    while let Some(event) = events.next().await {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = engine.handle_event(event).await {
                tracing::error!(error = %e, "Failed to handle event");
            }
        });
    }

    Ok(())
}
