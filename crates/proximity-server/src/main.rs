use proximity_server::{create_router, AppState, ServerConfig};
use std::net::SocketAddr;
use tracing_subscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = match std::env::var("RUST_LOG").as_deref() {
        Ok("debug") => tracing::Level::DEBUG,
        Ok("trace") => tracing::Level::TRACE,
        Ok("warn") => tracing::Level::WARN,
        Ok("error") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = ServerConfig::default();
    let bind_addr = format!("{}:{}", config.bind_address, config.port);

    let state = AppState::new(config).await?;
    let app = create_router(state);

    let addr: SocketAddr = bind_addr.parse()?;
    tracing::info!(%addr, "proximity server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
