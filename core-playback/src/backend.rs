//! Backend selection and the resolve → select → load pipeline.

use crate::error::{PlaybackError, Result};
use crate::item::LoadedMedia;
use bridge_traits::{
    MediaRequest, PlayableDescriptor, PlaybackBackend, PlaybackInfoResolver, PlaybackMode,
    PlaybackMonitor,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// First registered backend whose `can_play` accepts the descriptor.
pub fn select_backend(
    backends: &[Arc<dyn PlaybackBackend>],
    descriptor: &PlayableDescriptor,
) -> Result<Arc<dyn PlaybackBackend>> {
    backends
        .iter()
        .find(|backend| {
            backend.can_play(
                descriptor.stream_kind,
                &descriptor.codec,
                &descriptor.mime_type,
                descriptor.is_offline(),
            )
        })
        .cloned()
        .ok_or_else(|| PlaybackError::NoCompatibleBackend {
            codec: descriptor.codec.clone(),
            mime_type: descriptor.mime_type.clone(),
        })
}

/// Everything a spawned load needs; owns no orchestrator state.
pub(crate) struct LoadJob {
    pub resolver: Arc<dyn PlaybackInfoResolver>,
    pub backends: Vec<Arc<dyn PlaybackBackend>>,
    pub mode: PlaybackMode,
    pub request: MediaRequest,
    pub monitor: Arc<dyn PlaybackMonitor>,
}

impl LoadJob {
    #[instrument(skip(self), fields(product_id = %self.request.product_id, mode = ?self.mode))]
    pub async fn run(self) -> Result<LoadedMedia> {
        let descriptor = self
            .resolver
            .resolve(&self.request, self.mode)
            .await
            .map_err(|e| PlaybackError::resolve(self.request.product_id.clone(), e))?;

        let backend = select_backend(&self.backends, &descriptor)?;
        debug!(
            backend = backend.name(),
            codec = %descriptor.codec,
            url = core_runtime::logging::strip_url(&descriptor.url),
            "Selected backend"
        );

        let handle = backend
            .load(
                &descriptor,
                descriptor.cache_hint(),
                descriptor.license_hint(),
                self.monitor,
            )
            .await
            .map_err(|e| PlaybackError::backend(backend.name(), e))?;

        Ok(LoadedMedia {
            descriptor,
            backend,
            handle,
        })
    }
}
