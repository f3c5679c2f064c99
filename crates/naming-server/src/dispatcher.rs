//! Periodic scheduling for the notifier, beat-check, and distro protocol.
//!
//! Modeled as a Tokio multi-threaded runtime driving `tokio::time::interval`
//! ticks, following the teacher's async style in its cluster and client
//! layers rather than a dedicated thread pool per task kind.

use std::sync::Arc;
use std::time::Duration;

use naming_registry::BeatCheckTask;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::debug;

use crate::context::ServerContext;

/// Drives the server's four periodic loops: notifier dispatch, beat-check
/// sweep, distro sync, and distro verify.
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
    beat_check: Arc<BeatCheckTask>,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let beat_check = Arc::new(BeatCheckTask::new(
            ctx.registry.clone(),
            ctx.config.health_check_enabled,
            ctx.config.expire_instance,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx,
            beat_check,
            shutdown_tx,
        }
    }

    /// Spawns the four periodic loops and returns their join handles. The
    /// caller is expected to await them after calling [`shutdown`](Self::shutdown).
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(notifier_loop(
            self.ctx.clone(),
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(beat_check_loop(
            self.beat_check.clone(),
            Duration::from_millis(self.ctx.config.verify_interval_ms),
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(sync_loop(
            self.ctx.clone(),
            Duration::from_millis(self.ctx.config.task_dispatch_period_ms / 2),
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(verify_loop(
            self.ctx.clone(),
            Duration::from_millis(self.ctx.config.verify_interval_ms),
            self.shutdown_tx.subscribe(),
        )));

        handles
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn until_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.changed().await;
}

async fn notifier_loop(ctx: Arc<ServerContext>, shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_millis(50));
    let mut shutdown_fut = Box::pin(until_shutdown(shutdown));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let dispatched = ctx.notifier.dispatch_pending(&ctx.store, 1024);
                if dispatched > 0 {
                    debug!(dispatched, "notifier dispatched pending tasks");
                }
            }
            _ = &mut shutdown_fut => break,
        }
    }
}

async fn beat_check_loop(beat_check: Arc<BeatCheckTask>, period: Duration, shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    let mut shutdown_fut = Box::pin(until_shutdown(shutdown));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = now_millis();
                beat_check.sweep_all(now).await;
            }
            _ = &mut shutdown_fut => break,
        }
    }
}

async fn sync_loop(ctx: Arc<ServerContext>, period: Duration, shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    let mut shutdown_fut = Box::pin(until_shutdown(shutdown));
    loop {
        tokio::select! {
            _ = ticker.tick() => ctx.protocol.run_sync_tick().await,
            _ = &mut shutdown_fut => break,
        }
    }
}

async fn verify_loop(ctx: Arc<ServerContext>, period: Duration, shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    let mut shutdown_fut = Box::pin(until_shutdown(shutdown));
    loop {
        tokio::select! {
            _ = ticker.tick() => ctx.protocol.run_verify_tick().await,
            _ = &mut shutdown_fut => break,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
