// Run Context
// Everything one executing run shares with its space, task and control-flow runners

use crate::artifact::LoadedArtifact;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::execution::events::ProgressNotifier;
use crate::execution::input::InputProvider;
use crate::store::{RunStatus, StateStore};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a waiting run re-reads its stored status
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// State shared by the components executing a single run
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub artifact: Arc<LoadedArtifact>,
    pub store: Arc<dyn StateStore>,
    pub config: Arc<EngineConfig>,
    pub notifier: ProgressNotifier,
    pub cancel: CancellationToken,
    pub input: Option<Arc<dyn InputProvider>>,
}

impl RunContext {
    /// Fail fast if this run was cancelled in-process
    pub fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Terminated(self.run_id.clone()));
        }
        Ok(())
    }

    /// Like [`check_cancelled`](Self::check_cancelled), but also notices a
    /// terminate issued through another engine sharing the same store.
    pub async fn ensure_active(&self) -> EngineResult<()> {
        self.check_cancelled()?;

        let terminated = self
            .store
            .get_run(&self.run_id)
            .await?
            .map(|run| run.status == RunStatus::Terminated)
            .unwrap_or(false);

        if terminated {
            self.cancel.cancel();
            return Err(EngineError::Terminated(self.run_id.clone()));
        }
        Ok(())
    }

    /// Resolves once [`ensure_active`](Self::ensure_active) fails, polling the
    /// store every [`STATUS_POLL_INTERVAL`]
    pub async fn until_inactive(&self) -> EngineError {
        let mut ticks = tokio::time::interval(STATUS_POLL_INTERVAL);
        loop {
            ticks.tick().await;
            if let Err(err) = self.ensure_active().await {
                return err;
            }
        }
    }

    /// Whether the run is terminated, either in-process or in the store.
    /// Store errors count as not terminated.
    pub async fn is_terminated(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        match self.store.get_run(&self.run_id).await {
            Ok(run) => run.is_some_and(|run| run.status == RunStatus::Terminated),
            Err(err) => {
                tracing::warn!(run_id = %self.run_id, error = %err, "cannot read run status");
                false
            }
        }
    }
}
