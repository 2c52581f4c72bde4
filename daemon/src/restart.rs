use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Exit code recorded when the host stops because its configuration changed.
pub const RESTART_EXIT_CODE: i32 = 42;

/// Config change events closer together than this collapse into one restart.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(750);

const NO_RESTART: i64 = i64::MIN;

/// Cross-task "rebuild the host" flag. The first request wins.
#[derive(Debug)]
pub struct RestartCoordinator {
    code: AtomicI64,
}

impl Default for RestartCoordinator {
    fn default() -> Self {
        Self {
            code: AtomicI64::new(NO_RESTART),
        }
    }
}

impl RestartCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `exit_code` unless a restart is already pending. Returns true if this call won.
    pub fn request_restart(&self, exit_code: i32) -> bool {
        self.code
            .compare_exchange(NO_RESTART, i64::from(exit_code), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn restart_requested(&self) -> Option<i32> {
        match self.code.load(Ordering::Acquire) {
            NO_RESTART => None,
            // Only ever stored from an i32.
            code => i32::try_from(code).ok(),
        }
    }

    pub fn clear(&self) {
        self.code.store(NO_RESTART, Ordering::Release);
    }
}

/// Resettable deadline: every poke pushes it out by `window`; it fires once per burst.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn poke(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True exactly once, at or after the deadline of the latest burst.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Waits for config change notifications, debounces them, then requests a restart
/// and cancels `shutdown`.
///
/// Returns when `shutdown` is cancelled (by us or anyone else) or `changes` closes.
pub async fn watch_for_restart(
    mut changes: mpsc::Receiver<()>,
    coordinator: Arc<RestartCoordinator>,
    shutdown: CancellationToken,
    window: Duration,
) {
    let mut debouncer = Debouncer::new(window);
    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            _ = shutdown.cancelled() => return,
            change = changes.recv() => match change {
                Some(()) => debouncer.poke(Instant::now()),
                None => return,
            },
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            } => {
                if debouncer.fire_if_due(Instant::now()) {
                    info!("Configuration changed; restarting");
                    coordinator.request_restart(RESTART_EXIT_CODE);
                    shutdown.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    // ── RestartCoordinator ────────────────────────────────────────────────────

    #[test]
    fn no_restart_until_requested() {
        let c = RestartCoordinator::new();
        assert_eq!(c.restart_requested(), None);
        assert!(c.request_restart(42));
        assert_eq!(c.restart_requested(), Some(42));
    }

    #[test]
    fn first_request_wins() {
        let c = RestartCoordinator::new();
        assert!(c.request_restart(42));
        assert!(!c.request_restart(7));
        assert_eq!(c.restart_requested(), Some(42));
    }

    #[test]
    fn clear_resets_the_flag() {
        let c = RestartCoordinator::new();
        c.request_restart(42);
        c.clear();
        assert_eq!(c.restart_requested(), None);
        assert!(c.request_restart(3));
        assert_eq!(c.restart_requested(), Some(3));
    }

    #[test]
    fn negative_codes_are_kept() {
        let c = RestartCoordinator::new();
        c.request_restart(-1);
        assert_eq!(c.restart_requested(), Some(-1));
    }

    #[test]
    fn concurrent_requests_record_exactly_one_code() {
        for _ in 0..50 {
            let c = Arc::new(RestartCoordinator::new());
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let c = Arc::clone(&c);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        c.request_restart(100 + i)
                    })
                })
                .collect();
            let winners: Vec<_> = handles
                .into_iter()
                .enumerate()
                .filter_map(|(i, h)| h.join().unwrap().then_some(100 + i as i32))
                .collect();

            assert_eq!(winners.len(), 1);
            assert_eq!(c.restart_requested(), Some(winners[0]));
        }
    }

    // ── Debouncer ─────────────────────────────────────────────────────────────

    #[test]
    fn debouncer_fires_once_after_last_poke() {
        let window = Duration::from_millis(750);
        let t0 = Instant::now();
        let mut d = Debouncer::new(window);

        assert!(!d.fire_if_due(t0));
        d.poke(t0);
        d.poke(t0 + Duration::from_millis(500));
        assert!(!d.fire_if_due(t0 + Duration::from_millis(1000)));
        assert!(d.fire_if_due(t0 + Duration::from_millis(1250)));
        assert!(!d.fire_if_due(t0 + Duration::from_millis(5000)));
    }

    // ── watch_for_restart ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_requests_one_restart() {
        let (tx, rx) = mpsc::channel(16);
        let coordinator = Arc::new(RestartCoordinator::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watch_for_restart(
            rx,
            Arc::clone(&coordinator),
            shutdown.clone(),
            DEBOUNCE_WINDOW,
        ));

        let start = Instant::now();
        for _ in 0..5 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(!shutdown.is_cancelled());

        shutdown.cancelled().await;
        task.await.unwrap();
        assert_eq!(coordinator.restart_requested(), Some(RESTART_EXIT_CODE));
        // Last event at ~800 ms, plus the window.
        assert!(start.elapsed() >= Duration::from_millis(800) + DEBOUNCE_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn external_shutdown_does_not_request_restart() {
        let (_tx, rx) = mpsc::channel(16);
        let coordinator = Arc::new(RestartCoordinator::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watch_for_restart(
            rx,
            Arc::clone(&coordinator),
            shutdown.clone(),
            DEBOUNCE_WINDOW,
        ));

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(coordinator.restart_requested(), None);
    }
}
