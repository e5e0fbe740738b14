use tracing::{info, warn};

use portfolio_chat::config::AppConfig;
use portfolio_chat::{build_default_service, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portfolio_chat=debug,tower_http=debug".into()),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = AppConfig::from_env();
    info!("Groq model: {}", config.provider.model);
    info!("Fallback models: {}", config.provider.candidate_models.join(", "));
    info!("Email host: {}:{}", config.email.host, config.email.port);
    info!("Admin email: {}", config.email.admin_email);
    match config.max_conversations {
        Some(n) => info!("Conversation store capped at {n}"),
        None => info!("Conversation store unbounded"),
    }

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let chat_service = build_default_service(&config);

    // Startup connection check; a failure here does not stop the server.
    if chat_service.gateway().is_ready() {
        match chat_service.gateway().test_connection().await {
            Ok(report) => {
                let sample: String = report.response_sample.chars().take(100).collect();
                info!("Groq API connection successful, test response: {sample}");
            }
            Err(e) => warn!("Groq API connection failed: {e}"),
        }
    }

    let app = create_router(chat_service);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
