//! Shared dependencies every connection's session is built from.

use std::sync::Arc;

use pulse_core::{Estimator, FrameDecoder, WindowPolicy};
use pulse_session::SessionController;
use pulse_vision::EstimatorHandle;

use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;

/// Owns the process-wide decoder, estimator, and connection registry.
///
/// One [`SessionController`] is built per connection; nothing mutable is
/// shared between them.
pub struct SessionHub {
    config: ServerConfig,
    policy: WindowPolicy,
    decoder: Arc<dyn FrameDecoder>,
    estimator: Arc<EstimatorHandle>,
    registry: Arc<ConnectionRegistry>,
}

impl SessionHub {
    pub fn new(
        config: ServerConfig,
        policy: WindowPolicy,
        decoder: Arc<dyn FrameDecoder>,
        estimator: Arc<EstimatorHandle>,
    ) -> Arc<Self> {
        let registry = ConnectionRegistry::new(config.max_connections);
        Arc::new(Self {
            config,
            policy,
            decoder,
            estimator,
            registry,
        })
    }

    /// A fresh `Idle` controller wired to the shared collaborators.
    pub fn new_controller(&self) -> SessionController {
        let estimator: Arc<dyn Estimator> = self.estimator.clone();
        SessionController::new(self.policy.clone(), Arc::clone(&self.decoder), estimator)
            .with_estimate_timeout(self.config.estimate_timeout)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn estimator(&self) -> &Arc<EstimatorHandle> {
        &self.estimator
    }

    /// Whether the shared estimator is ready to serve.
    pub fn model_loaded(&self) -> bool {
        self.estimator.is_loaded()
    }
}
