//! Live TV request gate
//!
//! Ties the authorization chain to the live source registry: a live stream
//! request is authorized first and reaches the registry only when accepted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{Authorizer, Decision, Requirement};
use crate::error::{Error, Result};
use crate::registry::{
    LiveSourceRegistry, LiveStreamConsumer, LiveStreamRequest, RegistryConfig, TunerSource,
};
use crate::session::RequestContext;

/// Authorizes live TV requests and brokers their tuner streams
pub struct LiveTvGate {
    authorizer: Authorizer,
    registry: Arc<LiveSourceRegistry>,
    tuner: Arc<dyn TunerSource>,
}

impl LiveTvGate {
    /// Create a gate with a default registry
    pub fn new(authorizer: Authorizer, tuner: Arc<dyn TunerSource>) -> Self {
        Self::with_registry_config(authorizer, tuner, RegistryConfig::default())
    }

    /// Create a gate with custom registry configuration
    pub fn with_registry_config(
        authorizer: Authorizer,
        tuner: Arc<dyn TunerSource>,
        registry_config: RegistryConfig,
    ) -> Self {
        Self {
            authorizer,
            registry: Arc::new(LiveSourceRegistry::with_config(registry_config)),
            tuner,
        }
    }

    /// Get a reference to the live source registry
    pub fn registry(&self) -> &Arc<LiveSourceRegistry> {
        &self.registry
    }

    /// Evaluate `requirement` for the request in `ctx`
    pub fn authorize(&self, ctx: &RequestContext, requirement: Requirement) -> Decision {
        self.authorizer.authorize(ctx, requirement)
    }

    /// Authorize a live TV request and attach it to the requested stream
    ///
    /// Rejected requests return `AccessDenied` without touching the registry.
    pub async fn open_live_stream(
        &self,
        ctx: &RequestContext,
        request: &LiveStreamRequest,
        cancel: CancellationToken,
    ) -> Result<LiveStreamConsumer> {
        let decision = self.authorize(ctx, Requirement::LiveTvAccess);
        if !decision.is_accepted() {
            tracing::debug!(
                stream = %request.key,
                peer = ?ctx.peer_addr,
                decision = %decision,
                "Live stream request rejected"
            );
            return Err(Error::AccessDenied(decision));
        }

        let consumer = self
            .registry
            .acquire_source(request, Arc::clone(&self.tuner), cancel)
            .await?;
        Ok(consumer)
    }

    /// Detach a consumer obtained from [`open_live_stream`](Self::open_live_stream)
    pub async fn close_live_stream(&self, consumer: LiveStreamConsumer) -> Result<()> {
        self.registry.release(consumer).await?;
        Ok(())
    }

    /// Close every open stream
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.close_all().await;
        tracing::info!(closed = closed, "Live TV gate shut down");
        closed
    }
}
