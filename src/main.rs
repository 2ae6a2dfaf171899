use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lantern::config::Config;
use lantern::server::Server;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    let cfg = match std::env::args_os().nth(1) {
        Some(path) => Config::load_from(Some(PathBuf::from(path)))?,
        None => Config::load()?,
    };

    let mut server = Server::from_config(&cfg)?;
    let shutdown = server.shutdown_handle();
    let mut worker = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        res = &mut worker => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
            worker.await??;
        }
    }

    Ok(())
}
