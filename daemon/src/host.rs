/// The long-running monitor host and its restart loop.
///
/// One host lifetime owns a config snapshot, the poll loop and the config watcher,
/// all tied to a per-lifetime cancellation token. A config change cancels the
/// lifetime after requesting a restart; the outer loop then rebuilds everything so
/// the new file is read from scratch. Ctrl+C cancels the current lifetime and ends
/// the loop.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::actions::{ActionPipeline, Capabilities};
use crate::config;
use crate::inventory::NativeInventory;
use crate::monitor::{self, MonitorEngine};
use crate::paths::AppPaths;
use crate::restart::{watch_for_restart, RestartCoordinator, DEBOUNCE_WINDOW};
use crate::status::StatusFile;

/// Pause between tearing a lifetime down and building the next one.
pub const REBUILD_DELAY: Duration = Duration::from_millis(500);

/// Runs host lifetimes until one ends without a pending restart.
///
/// `lifetime` receives the coordinator (to request restarts) and the lifetime's
/// cancellation token, a child of `process_shutdown`.
pub async fn run_lifetimes<F, Fut>(
    coordinator: Arc<RestartCoordinator>,
    process_shutdown: CancellationToken,
    mut lifetime: F,
) -> Result<()>
where
    F: FnMut(Arc<RestartCoordinator>, CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        coordinator.clear();
        lifetime(Arc::clone(&coordinator), process_shutdown.child_token()).await?;

        if process_shutdown.is_cancelled() {
            return Ok(());
        }
        match coordinator.restart_requested() {
            Some(code) => {
                info!(code, "Restarting monitor host");
                tokio::time::sleep(REBUILD_DELAY).await;
            }
            None => return Ok(()),
        }
    }
}

/// One lifetime of the real monitor.
async fn run_once(
    paths: &AppPaths,
    coordinator: Arc<RestartCoordinator>,
    shutdown: CancellationToken,
) -> Result<()> {
    let config_path = paths.config_file();
    let config = config::load_or_default(&config_path)?;
    if config.dock_devices.is_empty() {
        info!("No dock devices configured; run `dock-monitor detect` to set them up");
    }
    info!(
        poll_ms = config.effective_poll_interval().as_millis() as u64,
        tokens = config.dock_devices.len(),
        "Monitor host starting"
    );

    let engine = MonitorEngine::new(
        NativeInventory,
        ActionPipeline::new(Capabilities::native()),
        Arc::new(RwLock::new(config)),
        shutdown.clone(),
    );
    let status = StatusFile::create(paths.status_file());

    let (change_tx, change_rx) = mpsc::channel(16);
    let watcher = tokio::spawn(config::watch_config(config_path, change_tx));
    let restarter = tokio::spawn(watch_for_restart(
        change_rx,
        coordinator,
        shutdown.clone(),
        DEBOUNCE_WINDOW,
    ));

    monitor::run(engine, status, shutdown.clone()).await;

    shutdown.cancel();
    watcher.abort();
    let _ = restarter.await;
    Ok(())
}

/// `dock-monitor run`: the foreground monitor. Returns on Ctrl+C.
pub async fn run(paths: AppPaths) -> Result<()> {
    paths.ensure_data_dir()?;
    config::ensure_default_exists(&paths.config_file())
        .context("Failed to create the default configuration")?;

    let process_shutdown = CancellationToken::new();
    {
        let token = process_shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received; shutting down");
                token.cancel();
            }
        });
    }

    info!("dock-monitor v{} started", env!("CARGO_PKG_VERSION"));
    let paths = &paths;
    run_lifetimes(Arc::new(RestartCoordinator::new()), process_shutdown, |coordinator, shutdown| {
        run_once(paths, coordinator, shutdown)
    })
    .await?;
    info!("dock-monitor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restart::RESTART_EXIT_CODE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn restart_request_rebuilds_the_host() {
        let lifetimes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lifetimes);

        run_lifetimes(
            Arc::new(RestartCoordinator::new()),
            CancellationToken::new(),
            move |coordinator, shutdown| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    // The flag is cleared before every lifetime.
                    assert_eq!(coordinator.restart_requested(), None);
                    if n < 2 {
                        coordinator.request_restart(RESTART_EXIT_CODE);
                        shutdown.cancel();
                    }
                    anyhow::Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(lifetimes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn process_shutdown_wins_over_restart() {
        let process_shutdown = CancellationToken::new();
        let lifetimes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lifetimes);
        let outer = process_shutdown.clone();

        run_lifetimes(
            Arc::new(RestartCoordinator::new()),
            process_shutdown,
            move |coordinator, shutdown| {
                counter.fetch_add(1, Ordering::SeqCst);
                let outer = outer.clone();
                async move {
                    coordinator.request_restart(RESTART_EXIT_CODE);
                    outer.cancel();
                    assert!(shutdown.is_cancelled());
                    anyhow::Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(lifetimes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lifetime_error_ends_the_loop() {
        let result = run_lifetimes(
            Arc::new(RestartCoordinator::new()),
            CancellationToken::new(),
            |_, _| async { Err::<(), _>(anyhow::anyhow!("Failed to parse config file")) },
        )
        .await;
        assert!(result.is_err());
    }
}
