use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use mailguard::api::{AppState, gateway_routes};
use mailguard::config::GatewayConfig;
use mailguard::pipeline::RequestPipeline;
use mailguard::security::rate_limit::spawn_prune_task;
use mailguard::security::StaticTokenResolver;

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

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;

    eprintln!("🛡  MailGuard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {:?}", config.mode);
    eprintln!(
        "   Mail server: {}",
        config.mailserver_url.as_deref().unwrap_or("(mock only)")
    );
    eprintln!(
        "   AI scanner: {}",
        config.scanner_url.as_deref().unwrap_or("(mock only)")
    );
    eprintln!(
        "   Rate limit: {} requests / {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_secs()
    );

    // ── Identity ─────────────────────────────────────────────────────────
    let resolver = StaticTokenResolver::new(&config.tokens);
    if resolver.is_empty() {
        eprintln!("   Tokens: none configured (every gated route will answer 401)");
    } else {
        eprintln!("   Tokens: {} configured", resolver.len());
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let pipeline = Arc::new(RequestPipeline::from_config(&config, Arc::new(resolver)));

    // Idle rate-limit windows are dropped once per window length
    let _prune_handle = spawn_prune_task(Arc::clone(pipeline.limiter()), config.rate_limit.window);

    let app = gateway_routes(AppState { pipeline });

    // ── Serve ────────────────────────────────────────────────────────────
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    eprintln!("   Listening: http://{}\n", addr);
    tracing::info!(port = config.port, "Gateway started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await
    .context("server error")?;

    Ok(())
}
