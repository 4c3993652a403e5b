mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use tpd_config::EnvConfig;
use tpd_core::registry::PluginRegistry;
use tpd_core::supervisor::Engine;
use tpd_exec::{ExecBuilder, ExecRunner};
use tpd_observe::{init_logger, LoggerConfig};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let root = std::env::var_os("TPD_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".tpd"));
    std::fs::create_dir_all(&root)?;
    let env = EnvConfig::load(&root)?;

    init_logger(&LoggerConfig::default())?;
    info!(root = %root.display(), "logger initialized");

    let mut registry = PluginRegistry::new();
    registry.register_builder(Arc::new(ExecBuilder));
    registry.register_runner(Arc::new(ExecRunner::new(env.daemon_dir())));

    let engine = Engine::new(env, registry)?;

    let recovered = engine.recover()?;
    if recovered > 0 {
        info!(count = recovered, "recovered scheduled tasks from previous run");
    }
    engine.start();
    info!(
        workers = engine.env().daemon.workers,
        "supervisor workers started"
    );

    let addr: SocketAddr = engine.env().daemon.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "task api listening");
    axum::serve(listener, http::router(engine)).await?;

    Ok(())
}
