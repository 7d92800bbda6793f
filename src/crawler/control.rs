//! Start/stop/status surface for a long-lived process
//!
//! The controller owns at most one background run of a shared coordinator.
//! `stop` only signals; the run finishes the listing page it is on before it
//! ends.

use crate::crawler::coordinator::{Coordinator, CrawlReport, CrawlStatus, StartMode};
use crate::{Result, ShelfError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ActiveRun {
    cancel: CancellationToken,
    handle: JoinHandle<CrawlReport>,
}

/// Runs crawls in the background on behalf of a control surface
pub struct CrawlController {
    coordinator: Arc<Coordinator>,
    active: Mutex<Option<ActiveRun>>,
}

impl CrawlController {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            active: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Starts a background run
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `AlreadyRunning` while a previous run is still active.
    pub fn start(&self, mode: StartMode) -> Result<()> {
        let mut active = self.active();
        self.coordinator.begin()?;

        let cancel = CancellationToken::new();
        let coordinator = Arc::clone(&self.coordinator);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { coordinator.execute(mode, token).await });

        if active.replace(ActiveRun { cancel, handle }).is_some() {
            tracing::debug!("Discarding the report of an unjoined earlier run");
        }
        tracing::info!("Crawl started ({:?})", mode);
        Ok(())
    }

    /// Requests a cooperative stop and returns immediately
    ///
    /// Returns `false` if there was no run to stop.
    pub fn stop(&self) -> bool {
        let active = self.active();
        let Some(run) = active.as_ref() else {
            return false;
        };
        if run.handle.is_finished() {
            return false;
        }

        run.cancel.cancel();
        self.coordinator.mark_stopping();
        tracing::info!("Stop requested");
        true
    }

    pub fn status(&self) -> CrawlStatus {
        self.coordinator.status()
    }

    /// Waits for the background run to end and returns its report
    ///
    /// Returns `Ok(None)` if no run was started since the last `wait`.
    pub async fn wait(&self) -> Result<Option<CrawlReport>> {
        let run = self.active().take();
        match run {
            Some(run) => run
                .handle
                .await
                .map(Some)
                .map_err(|e| ShelfError::Task(e.to_string())),
            None => Ok(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
