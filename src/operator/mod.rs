//! Background side of the service: network setup, the reclaim loop and the
//! initial pool bootstrap.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pool::{PoolError, PoolManager, Result};

pub struct Operator {
    pool: Arc<PoolManager>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Operator {
    pub fn new(pool: Arc<PoolManager>, cancel: CancellationToken) -> Self {
        Self {
            pool,
            cancel,
            tasks: Vec::new(),
        }
    }

    /// Prepares the network, runs one reclaim pass and launches the
    /// background tasks. A failure before the tasks are spawned is fatal.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting pool operator...");

        self.pool.create_network().await?;

        let report = self.pool.reclaim_expired().await?;
        info!(
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Startup reclaim pass finished"
        );

        let pool_config = &self.pool.config().pool;

        let reclaim = tokio::spawn(reclaim_loop(
            self.pool.clone(),
            pool_config.reclaim_interval(),
            self.cancel.clone(),
        ));
        self.tasks.push(("reclaim", reclaim));

        let bootstrap = tokio::spawn(bootstrap(
            self.pool.clone(),
            pool_config.initial_size,
            pool_config.bootstrap_attempts.max(1),
            pool_config.bootstrap_retry_delay(),
            self.cancel.clone(),
        ));
        self.tasks.push(("bootstrap", bootstrap));

        Ok(())
    }

    /// Cancels the background tasks and waits for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        for (name, task) in self.tasks {
            match task.await {
                Ok(()) => info!(task = name, "Operator task stopped"),
                Err(e) if e.is_panic() => error!(task = name, "Operator task panicked: {}", e),
                Err(e) => warn!(task = name, "Operator task aborted: {}", e),
            }
        }
    }
}

async fn reclaim_loop(pool: Arc<PoolManager>, period: Duration, cancel: CancellationToken) {
    info!(interval = ?period, "Reclaim loop started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; the startup pass already covered it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match pool.reclaim_expired().await {
            Ok(report) => {
                if !report.removed.is_empty() {
                    info!(removed = ?report.removed, "Expired containers removed");
                }
                if !report.failed.is_empty() {
                    warn!(failed = ?report.failed, "Some expired containers could not be removed");
                }
            }
            Err(e) => error!("Unable to remove expired containers: {}", e),
        }
    }

    info!("Reclaim loop stopped");
}

async fn bootstrap(
    pool: Arc<PoolManager>,
    target: usize,
    attempts: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    for attempt in 1..=attempts {
        match pool.ensure_initial(target, &cancel).await {
            Ok(created) => {
                info!(created, target, "Initial containers are ready");
                return;
            }
            Err(PoolError::Cancelled) => {
                info!("Bootstrap cancelled");
                return;
            }
            Err(e) => error!(attempt, attempts, "Unable to create initial containers: {}", e),
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Bootstrap cancelled");
                    return;
                }
                _ = sleep(retry_delay) => {}
            }
        }
    }

    warn!(attempts, "Giving up on initial containers");
}
