//! Citegraph web server.
//!
//! Run with: cargo run -p citegraph-web

use std::net::SocketAddr;

use citegraph_common::Settings;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::from_env();
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;

    info!("starting citegraph server");
    let state = citegraph_web::bootstrap(settings).await?;
    let app = citegraph_web::router::build_router(state);

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
