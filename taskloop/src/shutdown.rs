//! Interrupt handling: stop spawned processes, close the store and exit on Ctrl-C.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::exit_codes;
use crate::io::registry::ProcessTracker;
use crate::io::store::TaskStore;

/// Spawn a background thread that waits for Ctrl-C, kills the process trees
/// in `processes`, closes `store` and exits with [`exit_codes::INTERRUPTED`].
pub fn install_shutdown_handler(store: Arc<TaskStore>, processes: ProcessTracker) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    thread::Builder::new()
        .name("taskloop-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(err = %err, "failed to listen for interrupt");
                    return;
                }
                warn!("interrupt received, stopping spawned processes");
                let killed = processes.kill_all();
                if killed > 0 {
                    info!(killed, "terminated spawned processes");
                }
                if let Err(err) = store.close() {
                    warn!(err = %err, "failed to close task store");
                }
                std::process::exit(exit_codes::INTERRUPTED);
            });
        })
        .context("spawn signal thread")?;
    Ok(())
}
