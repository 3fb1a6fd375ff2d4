//! Process-wide estimator with an init-once lifecycle.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pulse_core::{EstimationError, Estimator, Frame, Reading};
use tokio::sync::OnceCell;
use tracing::{info, warn};

type Loader = Arc<dyn Fn() -> Result<Arc<dyn Estimator>, EstimationError> + Send + Sync>;

/// Lazily-loaded shared [`Estimator`].
///
/// Created once at startup and handed to every session by `Arc`. The loader
/// runs at most once successfully, even when several sessions race to the
/// first call; a failed load is retried on the next call.
pub struct EstimatorHandle {
    cell: OnceCell<Arc<dyn Estimator>>,
    loader: Loader,
}

impl EstimatorHandle {
    /// Wrap a loader. Loading is CPU/IO heavy and runs on `spawn_blocking`.
    pub fn new<F>(loader: F) -> Arc<Self>
    where
        F: Fn() -> Result<Arc<dyn Estimator>, EstimationError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            cell: OnceCell::new(),
            loader: Arc::new(loader),
        })
    }

    /// Handle around an estimator that is already built.
    pub fn ready(estimator: Arc<dyn Estimator>) -> Arc<Self> {
        let loaded = Arc::clone(&estimator);
        Arc::new(Self {
            cell: OnceCell::new_with(Some(estimator)),
            loader: Arc::new(move || Ok(Arc::clone(&loaded))),
        })
    }

    /// Load eagerly. Call at startup so the first session does not pay for it.
    pub async fn initialize(&self) -> Result<(), EstimationError> {
        let _ = self.get().await?;
        Ok(())
    }

    /// The shared estimator, loading it on first use.
    pub async fn get(&self) -> Result<Arc<dyn Estimator>, EstimationError> {
        self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let started = Instant::now();
                let result = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| EstimationError::Unavailable(format!("loader task: {e}")))?;
                match &result {
                    Ok(_) => info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "estimator loaded"
                    ),
                    Err(e) => warn!(error = %e, "estimator failed to load"),
                }
                result
            })
            .await
            .map(Arc::clone)
    }

    /// Whether the estimator has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl Estimator for EstimatorHandle {
    async fn estimate(
        &self,
        frames: Vec<Arc<Frame>>,
        frame_rate: f64,
    ) -> Result<Reading, EstimationError> {
        let estimator = self.get().await.map_err(|e| match e {
            EstimationError::Unavailable(_) => e,
            other => EstimationError::Unavailable(other.to_string()),
        })?;
        estimator.estimate(frames, frame_rate).await
    }
}
