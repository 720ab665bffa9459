//! Long-running `run` and one-time `bootstrap` commands.

use anyhow::{bail, Result};
use tracing::info;

use cardbridge::CardBridge;

use super::common::{emit, Session};

/// Bootstrap, start monitoring and block until Ctrl-C.
pub(crate) async fn cmd_run(session: Session) -> Result<()> {
    let deps = session.deps()?;
    let mut config = session.config;
    // Started explicitly below so a failure stops the command.
    config.monitor.autostart = false;

    let bridge = CardBridge::initialize(deps, config).await;
    if !bridge.vendor().is_ready() {
        bail!(
            "Card generator is not ready: {}",
            bridge.vendor().failure().unwrap_or("unknown reason")
        );
    }

    let reply = bridge.start_monitor().await;
    if !reply.ok {
        bridge.shutdown().await;
        bail!("{}", reply);
    }
    println!("{}", reply);
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    bridge.shutdown().await;
    println!("Stopped.");
    Ok(())
}

/// Run the acquire-and-verify pipeline once and print the resulting status.
pub(crate) async fn cmd_bootstrap(session: Session) -> Result<()> {
    let deps = session.deps()?;
    let mut config = session.config;
    config.monitor.autostart = false;

    let bridge = CardBridge::initialize(deps, config).await;
    emit(bridge.status().await)
}
